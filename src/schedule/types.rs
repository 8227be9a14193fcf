use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Highest progress a task can report before its terminal transition.
/// `100` is reserved for `Completed`.
pub const MAX_PENDING_PROGRESS: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted file conversion and its tracked outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionTask {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub input_path: PathBuf,
    pub original_name: String,
    pub target_format: String,
    pub output_path: Option<PathBuf>,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once, at the terminal transition.
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConversionTask {
    pub fn new(id: String, input_path: PathBuf, original_name: String, target_format: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: TaskStatus::Processing,
            progress: 0,
            message: "Conversion started".to_string(),
            input_path,
            original_name,
            target_format,
            output_path: None,
            download_url: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Decides how long finished tasks stay queryable.
///
/// Tasks still `processing` are never evicted. Finished tasks are dropped once
/// `ttl` has elapsed since their terminal transition, and whenever more than
/// `max_finished` of them are held, the ones that finished first go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub ttl: Duration,
    pub max_finished: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            max_finished: 1000,
        }
    }
}
