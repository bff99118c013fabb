//! Artifact storage.
//!
//! Artifacts are stored under a dated object key and addressed by a public
//! URL that is reported back in the completion event.

use crate::error::StorageError;
use crate::model::{JobId, JobType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

/// Upload destination for produced artifacts.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store the artifact and return its public URL.
    async fn upload(
        &self,
        job_id: &JobId,
        job_type: JobType,
        local: &Path,
    ) -> Result<String, StorageError>;
}

/// `outputs/{type}/{YYYY}/{MM}/{DD}/{job_id}{.ext}`.
pub fn object_key(job_type: JobType, job_id: &JobId, local: &Path, at: DateTime<Utc>) -> String {
    let ext = local
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!(
        "outputs/{}/{}/{}{}",
        job_type.as_str().to_lowercase(),
        at.format("%Y/%m/%d"),
        job_id,
        ext
    )
}

/// MIME type for an artifact, by extension.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Publishes artifacts by copying them into a directory served at
/// `public_base_url` (a shared volume behind a static file server or an
/// object-store gateway).
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    public_base_url: String,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn upload(
        &self,
        job_id: &JobId,
        job_type: JobType,
        local: &Path,
    ) -> Result<String, StorageError> {
        if !tokio::fs::try_exists(local).await? {
            return Err(StorageError::MissingArtifact(local.display().to_string()));
        }

        let key = object_key(job_type, job_id, local, Utc::now());
        let dest = self.root.join(&key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(local, &dest).await?;

        info!(
            %job_id,
            object = %key,
            content_type = content_type(local),
            bytes,
            "artifact uploaded"
        );
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}
