mod task_manager;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

pub use task_manager::{TaskManager, TaskStats, DEFAULT_DOWNLOAD_PREFIX};
pub use worker::TaskWorker;
use crate::schedule::processors::TaskProcessor;

pub struct TaskScheduler {
    task_manager: Arc<TaskManager>,
    processor: Arc<dyn TaskProcessor>,
    timeout: Option<Duration>,
    sweep_interval: Duration,
}

impl TaskScheduler {
    pub fn new(task_manager: Arc<TaskManager>, processor: Arc<dyn TaskProcessor>) -> Self {
        Self {
            task_manager,
            processor,
            timeout: None,
            sweep_interval: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Registers a conversion and starts it in the background.
    ///
    /// Returns as soon as the task exists; the outcome is only visible through
    /// the task manager. Fails without creating a task when the target format
    /// is rejected by the processor.
    pub async fn submit(&self, input_path: PathBuf, original_name: String, target_format: String) -> Result<String> {
        self.processor.validate_params(&target_format)?;

        let task_id = self.task_manager
            .create(input_path.clone(), original_name, target_format.clone())
            .await;

        let worker = TaskWorker::new(
            self.task_manager.clone(),
            self.processor.clone(),
            task_id.clone(),
            input_path,
            target_format,
        )
        .with_timeout(self.timeout);
        tokio::spawn(worker.run());

        Ok(task_id)
    }

    /// Evicts expired tasks and deletes the files they produced.
    pub async fn sweep(&self) -> usize {
        let evicted = self.task_manager.evict_expired(Utc::now()).await;
        for task in &evicted {
            let Some(output_path) = &task.output_path else { continue };
            if let Err(e) = tokio::fs::remove_file(output_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove output of task {}: {}", task.id, e);
                }
            }
        }
        evicted.len()
    }

    pub async fn run(&self) {
        let retention = self.task_manager.retention();
        info!(
            "Task sweeper running every {:?} (ttl {:?}, at most {} finished tasks)",
            self.sweep_interval, retention.ttl, retention.max_finished
        );
        let mut ticker = tokio::time::interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            let evicted = self.sweep().await;
            if evicted > 0 {
                let stats = self.task_manager.stats().await;
                info!(
                    "Sweep evicted {} tasks ({} processing, {} completed, {} failed left)",
                    evicted, stats.processing, stats.completed, stats.failed
                );
            }
        }
    }
}
