use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use anyhow::Result;

use crate::schedule::RetentionPolicy;

/// Runtime settings, read from the environment (and `.env`) once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Root of the upload tree; `temp/` and `processed/` live below it.
    pub upload_dir: PathBuf,
    pub log_dir: PathBuf,
    pub convert_timeout: Option<Duration>,
    pub task_ttl: Duration,
    pub max_finished_tasks: usize,
    pub sweep_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            upload_dir: PathBuf::from("./uploads"),
            log_dir: PathBuf::from("./logs"),
            convert_timeout: Some(Duration::from_secs(600)),
            task_ttl: Duration::from_secs(3600),
            max_finished_tasks: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match env_var("TOOLS_PORT").or_else(|| env_var("PORT")) {
            Some(port) => port.parse().map_err(|e| anyhow::anyhow!("Invalid port {}: {}", port, e))?,
            None => defaults.port,
        };
        let timeout_secs: u64 = parse_var("TOOLS_CONVERT_TIMEOUT_SECS", 600)?;

        Ok(Self {
            host: parse_var("TOOLS_HOST", defaults.host)?,
            port,
            upload_dir: env_var("TOOLS_UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            log_dir: env_var("TOOLS_LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            convert_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            task_ttl: Duration::from_secs(parse_var("TOOLS_TASK_TTL_SECS", 3600)?),
            max_finished_tasks: parse_var("TOOLS_MAX_FINISHED_TASKS", defaults.max_finished_tasks)?,
            sweep_interval: Duration::from_secs(parse_var("TOOLS_SWEEP_INTERVAL_SECS", 60)?),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.upload_dir.join("temp")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.upload_dir.join("processed")
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            ttl: self.task_ttl,
            max_finished: self.max_finished_tasks,
        }
    }

    // 确保上传目录存在
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.temp_dir(), self.processed_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}
