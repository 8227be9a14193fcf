pub mod convert;

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use anyhow::Result;
use crate::schedule::callback::TaskCallback;

pub use convert::SimulatedConverter;

/// A file-conversion backend.
///
/// `process` reports intermediate progress through the callback and returns the
/// path of the produced file. Terminal reporting is left to the caller.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate_params(&self, target_format: &str) -> Result<()>;
    async fn process(
        &self,
        input_path: &Path,
        target_format: &str,
        callback: &dyn TaskCallback,
    ) -> Result<PathBuf>;
}
