use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use axum::extract::multipart::{Field, Multipart};
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::utils::http::dotted_extension;
use super::error::ApiError;

const MB: usize = 1024 * 1024;

pub const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

pub const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "text/csv",
];

/// What a multipart file field may contain.
#[derive(Debug, Clone, Copy)]
pub struct UploadRule {
    pub allowed_types: &'static [&'static str],
    pub max_bytes: usize,
}

pub const IMAGE_UPLOAD: UploadRule = UploadRule { allowed_types: IMAGE_TYPES, max_bytes: 10 * MB };
pub const WATERMARK_UPLOAD: UploadRule = UploadRule { allowed_types: IMAGE_TYPES, max_bytes: 2 * MB };
pub const DOCUMENT_UPLOAD: UploadRule = UploadRule { allowed_types: DOCUMENT_TYPES, max_bytes: 20 * MB };

/// An upload persisted under the temp directory with a collision-free name.
#[derive(Debug)]
pub struct UploadedFile {
    pub path: PathBuf,
    /// `<unix millis>-<uuid><.ext>`
    pub stored_name: String,
    pub original_name: String,
    pub size: usize,
}

impl UploadedFile {
    pub fn extension(&self) -> String {
        dotted_extension(&self.original_name)
    }

    pub async fn read(&self) -> Result<Vec<u8>, ApiError> {
        fs::read(&self.path)
            .await
            .map_err(|e| ApiError::internal("Failed to read uploaded file", e))
    }

    pub async fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove upload {}: {}", self.path.display(), e);
            }
        }
    }
}

/// A parsed multipart form: files saved to disk, text fields kept in memory.
#[derive(Debug, Default)]
pub struct UploadForm {
    files: HashMap<String, UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    /// Reads the whole form. File fields not named in `rules` are skipped.
    /// On error, files saved so far are removed again.
    pub async fn parse(
        multipart: &mut Multipart,
        temp_dir: &Path,
        rules: &[(&str, UploadRule)],
    ) -> Result<Self, ApiError> {
        let mut form = Self::default();
        match form.read_fields(multipart, temp_dir, rules).await {
            Ok(()) => Ok(form),
            Err(e) => {
                form.discard().await;
                Err(e)
            }
        }
    }

    async fn read_fields(
        &mut self,
        multipart: &mut Multipart,
        temp_dir: &Path,
        rules: &[(&str, UploadRule)],
    ) -> Result<(), ApiError> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart field: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if let Some((_, rule)) = rules.iter().find(|(expected, _)| *expected == name) {
                if self.files.contains_key(&name) {
                    return Err(ApiError::BadRequest(format!("Only one file is accepted in field {}", name)));
                }
                let file = save_file(field, temp_dir, *rule).await?;
                self.files.insert(name, file);
            } else if field.file_name().is_none() {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read field {}: {}", name, e)))?;
                self.fields.insert(name, value);
            } else {
                debug!("Skipping unexpected file field {}", name);
            }
        }
        Ok(())
    }

    /// Trimmed text field; blank values count as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Parsed text field; unparsable values count as absent.
    pub fn parse_field<T: FromStr>(&self, name: &str) -> Option<T> {
        self.field(name)?.parse().ok()
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }

    pub async fn discard(&mut self) {
        for (_, file) in self.files.drain() {
            file.discard().await;
        }
    }
}

async fn save_file(mut field: Field<'_>, temp_dir: &Path, rule: UploadRule) -> Result<UploadedFile, ApiError> {
    let original_name = field
        .file_name()
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    if !rule.allowed_types.contains(&content_type.as_str()) {
        return Err(ApiError::BadRequest(format!("Unsupported file type: {}", content_type)));
    }

    fs::create_dir_all(temp_dir)
        .await
        .map_err(|e| ApiError::internal("Failed to prepare upload directory", e))?;
    let stored_name = format!(
        "{}-{}{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        dotted_extension(&original_name)
    );
    let path = temp_dir.join(&stored_name);
    let mut file = fs::File::create(&path)
        .await
        .map_err(|e| ApiError::internal("Failed to store upload", e))?;

    let mut size = 0usize;
    let written: Result<(), ApiError> = async {
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read file chunk: {}", e)))?
        {
            size += chunk.len();
            if size > rule.max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "File too large: the limit is {} MB",
                    rule.max_bytes / MB
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::internal("Failed to store upload", e))?;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::internal("Failed to store upload", e))
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(remove_err) = fs::remove_file(&path).await {
            warn!("Failed to remove partial upload {}: {}", path.display(), remove_err);
        }
        return Err(e);
    }

    debug!("Stored upload {} ({} bytes, {}) as {}", original_name, size, content_type, stored_name);
    Ok(UploadedFile {
        path,
        stored_name,
        original_name,
        size,
    })
}
