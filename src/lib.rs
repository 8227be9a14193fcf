pub mod config;
pub mod imaging;
pub mod schedule;
pub mod utils;
pub mod web;

use std::sync::Arc;
use config::AppConfig;
use once_cell::sync::Lazy;
use schedule::{SimulatedConverter, TaskManager, TaskProcessor, TaskScheduler};

/// Shared state handed to every route.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub task_manager: Arc<TaskManager>,
    pub scheduler: Arc<TaskScheduler>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let processor = Arc::new(SimulatedConverter::new(config.processed_dir()));
        Self::with_processor(config, processor)
    }

    pub fn with_processor(config: AppConfig, processor: Arc<dyn TaskProcessor>) -> Self {
        let task_manager = Arc::new(TaskManager::new(config.retention()));
        let scheduler = TaskScheduler::new(task_manager.clone(), processor)
            .with_timeout(config.convert_timeout)
            .with_sweep_interval(config.sweep_interval);

        Self {
            config: Arc::new(config),
            task_manager,
            scheduler: Arc::new(scheduler),
        }
    }
}

pub static VERSION: Lazy<String> = Lazy::new(|| {
    format!("{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"))
});

pub fn init_env() {
    dotenv::dotenv().ok();
}
