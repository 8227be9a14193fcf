use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

/// Producer-side contract of a running conversion.
///
/// A processor reports progress through `on_progress`; whoever drives the
/// processor finishes the task with exactly one of `on_complete` / `on_error`.
pub trait TaskCallback: Send + Sync {
    fn on_progress(&self, progress: u8, message: &str);
    fn on_complete(&self, output_path: &Path);
    fn on_error(&self, error: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Progress { progress: u8, message: String },
    Completed { output_path: PathBuf },
    Failed { error: String },
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskEvent::Progress { .. })
    }
}

/// Forwards callback invocations as [`TaskEvent`]s over a channel.
///
/// The first terminal call latches the callback: everything after it,
/// progress included, is dropped before it reaches the channel.
pub struct ChannelCallback {
    sender: mpsc::UnboundedSender<TaskEvent>,
    settled: AtomicBool,
}

impl ChannelCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let callback = Self {
            sender,
            settled: AtomicBool::new(false),
        };
        (callback, receiver)
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Returns true for the caller that wins the terminal transition.
    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }

    fn send(&self, event: TaskEvent) {
        // receiver gone means nobody tracks this task anymore
        if let Err(e) = self.sender.send(event) {
            trace!("Dropping task event, receiver closed: {:?}", e.0);
        }
    }
}

impl TaskCallback for ChannelCallback {
    fn on_progress(&self, progress: u8, message: &str) {
        if self.is_settled() {
            return;
        }
        self.send(TaskEvent::Progress {
            progress,
            message: message.to_string(),
        });
    }

    fn on_complete(&self, output_path: &Path) {
        if self.settle() {
            self.send(TaskEvent::Completed {
                output_path: output_path.to_path_buf(),
            });
        }
    }

    fn on_error(&self, error: &str) {
        if self.settle() {
            self.send(TaskEvent::Failed {
                error: error.to_string(),
            });
        }
    }
}
