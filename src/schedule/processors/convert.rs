use async_trait::async_trait;
use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info};

use crate::schedule::callback::TaskCallback;
use super::TaskProcessor;

const MAX_FORMAT_LEN: usize = 10;
const START_PROGRESS: u8 = 10;
const TICK_STEP: u8 = 5;
const TICK_CEILING: u8 = 90;

/// Stand-in for a document converter.
///
/// Emits timer-driven progress while it "converts": after `delay` it writes a
/// short text file for `txt` targets and copies the input bytes for anything else.
#[derive(Debug, Clone)]
pub struct SimulatedConverter {
    output_dir: PathBuf,
    // interval between fake progress ticks. e.g. 500ms
    tick: Duration,
    // how long the conversion itself takes. e.g. 3 seconds
    delay: Duration,
}

impl SimulatedConverter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            tick: Duration::from_millis(500),
            delay: Duration::from_secs(3),
        }
    }

    pub fn with_timing(mut self, tick: Duration, delay: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self.delay = delay;
        self
    }

    fn output_path(&self, input_path: &Path, target_format: &str) -> PathBuf {
        let stem = input_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "converted".to_string());
        let timestamp = Utc::now().timestamp_millis();
        self.output_dir.join(format!("{}-{}.{}", stem, timestamp, target_format))
    }

    async fn simulate(&self, input_path: &Path, output_path: &Path, target_format: &str) -> Result<()> {
        let content = fs::read(input_path).await
            .map_err(|e| anyhow::anyhow!("Failed to read input file: {}", e))?;

        sleep(self.delay).await;

        let written = if target_format.eq_ignore_ascii_case("txt") {
            let original = input_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let text = format!("This is a simulated text conversion.\nOriginal file: {}\n", original);
            fs::write(output_path, text).await
        } else {
            fs::write(output_path, content).await
        };
        written.map_err(|e| anyhow::anyhow!("Failed to write output file: {}", e))?;

        debug!("Simulated conversion wrote {}", output_path.display());
        Ok(())
    }
}

#[async_trait]
impl TaskProcessor for SimulatedConverter {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn validate_params(&self, target_format: &str) -> Result<()> {
        let valid = !target_format.is_empty()
            && target_format.len() <= MAX_FORMAT_LEN
            && target_format.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(anyhow::anyhow!("Unsupported target format: {}", target_format));
        }
        Ok(())
    }

    async fn process(
        &self,
        input_path: &Path,
        target_format: &str,
        callback: &dyn TaskCallback,
    ) -> Result<PathBuf> {
        self.validate_params(target_format)?;

        fs::create_dir_all(&self.output_dir).await
            .map_err(|e| anyhow::anyhow!("Failed to create output directory: {}", e))?;
        let output_path = self.output_path(input_path, target_format);
        info!("Converting {} to {}", input_path.display(), output_path.display());

        callback.on_progress(START_PROGRESS, "Preparing conversion...");

        // the conversion future borrows output_path, so it must end before the return
        {
            let conversion = self.simulate(input_path, &output_path, target_format);
            tokio::pin!(conversion);

            let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
            let mut progress = START_PROGRESS;
            loop {
                tokio::select! {
                    result = &mut conversion => {
                        result?;
                        break;
                    }
                    _ = ticker.tick(), if progress < TICK_CEILING => {
                        progress += TICK_STEP;
                        callback.on_progress(progress, &format!("Converting... {}%", progress));
                    }
                }
            }
        }

        // completion (and progress 100) is reported by the worker through on_complete
        Ok(output_path)
    }
}
