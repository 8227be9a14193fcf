use super::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::sleep;

// 测试用的处理器：直接返回错误
struct FailingProcessor;

#[async_trait]
impl TaskProcessor for FailingProcessor {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn validate_params(&self, _target_format: &str) -> Result<()> {
        Ok(())
    }

    async fn process(&self, _input: &Path, _format: &str, callback: &dyn TaskCallback) -> Result<PathBuf> {
        callback.on_progress(30, "Converting... 30%");
        Err(anyhow::anyhow!("disk full"))
    }
}

struct PanickingProcessor;

#[async_trait]
impl TaskProcessor for PanickingProcessor {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn validate_params(&self, _target_format: &str) -> Result<()> {
        Ok(())
    }

    async fn process(&self, _input: &Path, _format: &str, _callback: &dyn TaskCallback) -> Result<PathBuf> {
        panic!("converter crashed");
    }
}

struct StalledProcessor;

#[async_trait]
impl TaskProcessor for StalledProcessor {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn validate_params(&self, _target_format: &str) -> Result<()> {
        Ok(())
    }

    async fn process(&self, _input: &Path, _format: &str, callback: &dyn TaskCallback) -> Result<PathBuf> {
        callback.on_progress(10, "Preparing conversion...");
        sleep(Duration::from_secs(3600)).await;
        Ok(PathBuf::from("/never/written"))
    }
}

struct TestEnv {
    dir: TempDir,
    manager: Arc<TaskManager>,
}

impl TestEnv {
    fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            manager: Arc::new(TaskManager::new(RetentionPolicy::default())),
        })
    }

    fn fast_converter(&self) -> Arc<dyn TaskProcessor> {
        Arc::new(
            SimulatedConverter::new(self.dir.path().join("processed"))
                .with_timing(Duration::from_millis(5), Duration::from_millis(50)),
        )
    }

    async fn upload(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    async fn wait_terminal(&self, task_id: &str) -> ConversionTask {
        poll_task(&self.manager, task_id, Duration::from_millis(10), |task| {
            task.is_terminal().then(|| task.clone())
        })
        .await
    }
}

// 轮询任务直到 check 返回结果，最多 200 次
async fn poll_task<T>(
    manager: &TaskManager,
    task_id: &str,
    interval: Duration,
    mut check: impl FnMut(&ConversionTask) -> Option<T>,
) -> T {
    for _ in 0..200 {
        let task = manager.get(task_id).await.expect("task should exist");
        if let Some(found) = check(&task) {
            return found;
        }
        sleep(interval).await;
    }
    panic!("task {} did not reach the expected state in time", task_id);
}

#[tokio::test]
async fn test_txt_conversion_lifecycle() -> Result<()> {
    let env = TestEnv::new()?;
    let scheduler = TaskScheduler::new(env.manager.clone(), env.fast_converter());
    let input = env.upload("1700-report.docx", b"document body").await?;

    // 1. 提交任务后立即可查询
    let task_id = scheduler.submit(input.clone(), "report.docx".to_string(), "txt".to_string()).await?;
    let task = env.manager.get(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert!(task.download_url.is_none());

    // 2. 等待完成
    let task = env.wait_terminal(&task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.error.is_none());

    let output = task.output_path.clone().unwrap();
    let file_name = output.file_name().unwrap().to_string_lossy().into_owned();
    assert!(task.download_url.unwrap().ends_with(&format!("/download/{}", file_name)));
    assert!(output.exists());

    // 3. 上传的源文件被清理
    assert!(!input.exists());
    Ok(())
}

#[tokio::test]
async fn test_progress_is_monotonic_while_polling() -> Result<()> {
    let env = TestEnv::new()?;
    let scheduler = TaskScheduler::new(env.manager.clone(), env.fast_converter());
    let input = env.upload("notes.txt", b"hello").await?;
    let task_id = scheduler.submit(input, "notes.txt".to_string(), "pdf".to_string()).await?;

    let mut last = 0;
    let status = poll_task(&env.manager, &task_id, Duration::from_millis(2), |task| {
        assert!(task.progress >= last, "progress went back from {} to {}", last, task.progress);
        assert_eq!(task.progress == 100, task.status == TaskStatus::Completed);
        if task.status == TaskStatus::Processing {
            assert_ne!(task.message, "Conversion completed");
        }
        last = task.progress;
        task.is_terminal().then_some(task.status)
    })
    .await;
    assert_eq!(status, TaskStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_processor_error_fails_task() -> Result<()> {
    let env = TestEnv::new()?;
    let scheduler = TaskScheduler::new(env.manager.clone(), Arc::new(FailingProcessor));
    let input = env.upload("a.pdf", b"%PDF").await?;

    let task_id = scheduler.submit(input, "a.pdf".to_string(), "docx".to_string()).await?;
    let task = env.wait_terminal(&task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("disk full"));
    assert_eq!(task.message, "Conversion failed: disk full");
    assert!(task.download_url.is_none());
    Ok(())
}

#[tokio::test]
async fn test_panicking_processor_fails_task() -> Result<()> {
    let env = TestEnv::new()?;
    let scheduler = TaskScheduler::new(env.manager.clone(), Arc::new(PanickingProcessor));
    let input = env.upload("b.pdf", b"%PDF").await?;

    let task_id = scheduler.submit(input, "b.pdf".to_string(), "docx".to_string()).await?;
    let task = env.wait_terminal(&task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("conversion task panicked"));
    Ok(())
}

#[tokio::test]
async fn test_timed_out_processor_fails_task() -> Result<()> {
    let env = TestEnv::new()?;
    let scheduler = TaskScheduler::new(env.manager.clone(), Arc::new(StalledProcessor))
        .with_timeout(Some(Duration::from_millis(50)));
    let input = env.upload("c.pdf", b"%PDF").await?;

    let task_id = scheduler.submit(input, "c.pdf".to_string(), "docx".to_string()).await?;
    let task = env.wait_terminal(&task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("timed out"));
    assert_eq!(task.progress, 10);
    Ok(())
}

#[tokio::test]
async fn test_rejected_format_creates_no_task() -> Result<()> {
    let env = TestEnv::new()?;
    let scheduler = TaskScheduler::new(env.manager.clone(), env.fast_converter());
    let input = env.upload("d.docx", b"doc").await?;

    let result = scheduler.submit(input, "d.docx".to_string(), "../../etc".to_string()).await;
    assert!(result.is_err());
    assert_eq!(env.manager.stats().await, TaskStats::default());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_submissions_are_independent() -> Result<()> {
    let env = TestEnv::new()?;
    let scheduler = TaskScheduler::new(env.manager.clone(), env.fast_converter());
    let first = env.upload("one.docx", b"1").await?;
    let second = env.upload("two.docx", b"2").await?;

    let (a, b) = tokio::join!(
        scheduler.submit(first, "one.docx".to_string(), "txt".to_string()),
        scheduler.submit(second, "two.docx".to_string(), "pdf".to_string()),
    );
    let (a, b) = (a?, b?);
    assert_ne!(a, b);

    let (a, b) = (env.wait_terminal(&a).await, env.wait_terminal(&b).await);
    assert_eq!(a.target_format, "txt");
    assert_eq!(b.target_format, "pdf");
    assert_ne!(a.output_path, b.output_path);
    Ok(())
}

#[tokio::test]
async fn test_sweep_removes_evicted_outputs() -> Result<()> {
    let env = TestEnv::new()?;
    let manager = Arc::new(TaskManager::new(RetentionPolicy { ttl: Duration::ZERO, max_finished: 10 }));
    let scheduler = TaskScheduler::new(manager.clone(), env.fast_converter());
    let input = env.upload("e.docx", b"doc").await?;

    let task_id = scheduler.submit(input, "e.docx".to_string(), "txt".to_string()).await?;
    let output = poll_task(&manager, &task_id, Duration::from_millis(10), |task| task.output_path.clone()).await;
    assert!(output.exists());

    assert_eq!(scheduler.sweep().await, 1);
    assert!(manager.get(&task_id).await.is_none());
    assert!(!output.exists());
    Ok(())
}
