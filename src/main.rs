#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use tracing::info;
use std::sync::Arc;
use online_tools_rs::{config::AppConfig, utils::logger, AppContext, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    online_tools_rs::init_env();
    let config = AppConfig::from_env()?;

    // 初始化日志系统
    let _guard = logger::init(&config.log_dir)?;
    // 创建必要的目录
    config.ensure_dirs()?;

    info!("Starting online tools service {}...", *VERSION);

    // 创建应用上下文
    let addr = config.addr();
    let ctx = Arc::new(AppContext::new(config));

    // 启动过期任务清理
    info!("Initializing Scheduler...");
    let scheduler = ctx.scheduler.clone();
    tokio::spawn(async move {
        scheduler.run().await;
    });

    // 启动 HTTP 服务器
    info!("Starting HTTP server at http://{}", addr);
    match online_tools_rs::web::start_server(ctx.clone(), addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    info!("Shutting down...");
    Ok(())
}
