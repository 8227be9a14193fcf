use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn, error};

use crate::schedule::callback::{ChannelCallback, TaskCallback};
use crate::schedule::processors::TaskProcessor;
use super::TaskManager;

/// Drives one conversion task from start to its terminal state.
pub struct TaskWorker {
    // task manager
    task_manager: Arc<TaskManager>,
    // conversion backend. e.g. SimulatedConverter
    processor: Arc<dyn TaskProcessor>,
    task_id: String,
    input_path: PathBuf,
    target_format: String,
    // upper bound for one conversion. None disables it
    timeout: Option<Duration>,
}

impl TaskWorker {
    pub fn new(
        task_manager: Arc<TaskManager>,
        processor: Arc<dyn TaskProcessor>,
        task_id: String,
        input_path: PathBuf,
        target_format: String,
    ) -> Self {
        Self {
            task_manager,
            processor,
            task_id,
            input_path,
            target_format,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(self) {
        info!("Running {} conversion for task {}", self.processor.name(), self.task_id);

        let (callback, mut events) = ChannelCallback::new();
        let callback = Arc::new(callback);
        let supervisor = tokio::spawn(supervise(
            self.processor.clone(),
            callback,
            self.input_path.clone(),
            self.target_format.clone(),
            self.timeout,
        ));

        // the channel closes once the supervisor and the processor drop their callbacks
        while let Some(event) = events.recv().await {
            // the upload is gone before the task reads as finished
            if event.is_terminal() {
                self.discard_input().await;
            }
            self.task_manager.apply_event(&self.task_id, event).await;
        }

        if let Err(e) = supervisor.await {
            error!("Supervisor of task {} stopped abnormally: {}", self.task_id, e);
        }

        let unfinished = self.task_manager
            .get(&self.task_id)
            .await
            .is_some_and(|task| !task.is_terminal());
        if unfinished {
            self.discard_input().await;
            self.task_manager.fail(&self.task_id, "conversion ended without a result").await;
        }
    }

    // uploads are single-use
    async fn discard_input(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.input_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove upload {}: {}", self.input_path.display(), e);
            }
        }
    }
}

/// Runs the processor in its own task and reports exactly one terminal event.
async fn supervise(
    processor: Arc<dyn TaskProcessor>,
    callback: Arc<ChannelCallback>,
    input_path: PathBuf,
    target_format: String,
    timeout: Option<Duration>,
) {
    let progress = callback.clone();
    let mut job = tokio::spawn(async move {
        processor.process(&input_path, &target_format, progress.as_ref()).await
    });

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut job).await {
            Ok(joined) => joined,
            Err(_) => {
                job.abort();
                callback.on_error(&format!("conversion timed out after {:?}", limit));
                return;
            }
        },
        None => job.await,
    };

    match outcome {
        Ok(Ok(output_path)) => callback.on_complete(&output_path),
        Ok(Err(e)) => callback.on_error(&e.to_string()),
        Err(e) if e.is_panic() => callback.on_error("conversion task panicked"),
        Err(e) => callback.on_error(&format!("conversion task was cancelled: {}", e)),
    }
}
