use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::schedule::callback::TaskEvent;
use crate::schedule::types::{
    ConversionTask, RetentionPolicy, TaskStatus, MAX_PENDING_PROGRESS,
};

pub const DEFAULT_DOWNLOAD_PREFIX: &str = "/api/file/download";

/// In-memory registry of conversion tasks.
///
/// Every mutation runs under the write lock, so readers only ever see a task
/// as it was before or after a whole update. Mutations on unknown or finished
/// tasks are no-ops and report `false`.
pub struct TaskManager {
    tasks: RwLock<HashMap<String, ConversionTask>>,
    retention: RetentionPolicy,
    download_prefix: String,
}

impl TaskManager {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            retention,
            download_prefix: DEFAULT_DOWNLOAD_PREFIX.to_string(),
        }
    }

    pub fn with_download_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.download_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub async fn create(&self, input_path: PathBuf, original_name: String, target_format: String) -> String {
        let mut tasks = self.tasks.write().await;
        let mut id = format!("task-{}", Uuid::new_v4());
        while tasks.contains_key(&id) {
            id = format!("task-{}", Uuid::new_v4());
        }

        let task = ConversionTask::new(id.clone(), input_path, original_name, target_format);
        info!("Creating conversion task {} ({} -> {})", id, task.original_name, task.target_format);
        tasks.insert(id.clone(), task);
        id
    }

    pub async fn update(&self, task_id: &str, progress: u8, message: &str) -> bool {
        let applied = self.mutate_pending(task_id, |task| {
            // progress never goes backwards and 100 belongs to completion
            task.progress = task.progress.max(progress.min(MAX_PENDING_PROGRESS));
            task.message = message.to_string();
        }).await;

        if !applied {
            debug!("Ignoring progress update for task {}: unknown or finished", task_id);
        }
        applied
    }

    pub async fn complete(&self, task_id: &str, output_path: &Path) -> bool {
        let file_name = output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let download_url = format!("{}/{}", self.download_prefix, file_name);

        let applied = self.mutate_pending(task_id, |task| {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.message = "Conversion completed".to_string();
            task.output_path = Some(output_path.to_path_buf());
            task.download_url = Some(download_url);
            task.finished_at = Some(task.updated_at);
        }).await;

        if applied {
            info!("Task {} completed: {}", task_id, output_path.display());
        } else {
            warn!("Ignoring completion of task {}: unknown or already finished", task_id);
        }
        applied
    }

    pub async fn fail(&self, task_id: &str, error: &str) -> bool {
        let applied = self.mutate_pending(task_id, |task| {
            task.status = TaskStatus::Failed;
            task.message = format!("Conversion failed: {}", error);
            task.error = Some(error.to_string());
            task.finished_at = Some(task.updated_at);
        }).await;

        if applied {
            warn!("Task {} failed: {}", task_id, error);
        } else {
            warn!("Ignoring failure of task {} ({}): unknown or already finished", task_id, error);
        }
        applied
    }

    pub async fn apply_event(&self, task_id: &str, event: TaskEvent) -> bool {
        match event {
            TaskEvent::Progress { progress, message } => self.update(task_id, progress, &message).await,
            TaskEvent::Completed { output_path } => self.complete(task_id, &output_path).await,
            TaskEvent::Failed { error } => self.fail(task_id, &error).await,
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<ConversionTask> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Finds the completed task that produced `file_name`.
    pub async fn find_by_output(&self, file_name: &str) -> Option<ConversionTask> {
        let wanted = OsStr::new(file_name);
        self.tasks
            .read()
            .await
            .values()
            .find(|task| {
                task.output_path
                    .as_deref()
                    .and_then(Path::file_name)
                    .is_some_and(|name| name == wanted)
            })
            .cloned()
    }

    pub async fn stats(&self) -> TaskStats {
        let tasks = self.tasks.read().await;
        let mut stats = TaskStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Removes finished tasks according to the retention policy and returns them.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Vec<ConversionTask> {
        let mut tasks = self.tasks.write().await;
        let mut evicted = Vec::new();

        // an out-of-range ttl means finished tasks never expire by age
        if let Ok(ttl) = chrono::Duration::from_std(self.retention.ttl) {
            let expired: Vec<String> = tasks
                .values()
                .filter(|task| task.finished_at.is_some_and(|finished| now - finished >= ttl))
                .map(|task| task.id.clone())
                .collect();
            evicted.extend(expired.iter().filter_map(|id| tasks.remove(id)));
        }

        let mut finished: Vec<(DateTime<Utc>, String)> = tasks
            .values()
            .filter_map(|task| task.finished_at.map(|finished| (finished, task.id.clone())))
            .collect();
        if finished.len() > self.retention.max_finished {
            finished.sort();
            let excess = finished.len() - self.retention.max_finished;
            for (_, id) in finished.into_iter().take(excess) {
                if let Some(task) = tasks.remove(&id) {
                    evicted.push(task);
                }
            }
        }

        if !evicted.is_empty() {
            info!("Evicted {} finished tasks, {} remain", evicted.len(), tasks.len());
        }
        evicted
    }

    async fn mutate_pending<F>(&self, task_id: &str, op: F) -> bool
    where
        F: FnOnce(&mut ConversionTask),
    {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) if !task.is_terminal() => {
                task.updated_at = Utc::now();
                op(task);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskStats {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}
