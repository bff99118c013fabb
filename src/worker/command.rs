//! Workers backed by external executables.
//!
//! Each job runs in a fresh scratch directory holding `payload.json`. The
//! executable prints the artifact path as the last non-empty line of stdout.

use super::{Worker, WorkerDef};
use crate::error::WorkerError;
use crate::model::{JobType, Payload};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bytes of stderr kept in error messages.
const STDERR_TAIL: usize = 2000;

pub struct CommandWorker {
    job_type: JobType,
    command: PathBuf,
    scratch_root: PathBuf,
    timeout: Option<Duration>,
}

impl CommandWorker {
    /// Validate the definition and run the optional warmup hook.
    pub async fn start(def: &WorkerDef, work_dir: &Path) -> Result<Self, WorkerError> {
        let job_type = def.job_type;
        let construction = |reason: String| WorkerError::Construction { job_type, reason };

        let command = absolute(&def.command).map_err(|e| construction(e.to_string()))?;
        if !command.is_file() {
            return Err(construction(format!(
                "command not found: {}",
                command.display()
            )));
        }

        let scratch_root = work_dir.join(job_type.as_str().to_lowercase());
        tokio::fs::create_dir_all(&scratch_root)
            .await
            .map_err(|e| construction(format!("cannot create {}: {e}", scratch_root.display())))?;

        if let Some(ref warmup) = def.warmup {
            let warmup = absolute(warmup).map_err(|e| construction(e.to_string()))?;
            info!(%job_type, command = %warmup.display(), "running warmup hook");
            let output = Command::new(&warmup)
                .current_dir(&scratch_root)
                .env("JOBROUTE_JOB_TYPE", job_type.as_str())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| construction(format!("cannot run {}: {e}", warmup.display())))?;
            if !output.status.success() {
                return Err(construction(format!(
                    "warmup exited with status {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr_tail(&output)
                )));
            }
        }

        Ok(Self {
            job_type,
            command,
            scratch_root,
            timeout: def.timeout_secs.map(Duration::from_secs),
        })
    }

    async fn run(&self, dir: &Path, job_id: &str) -> Result<Output, WorkerError> {
        let mut cmd = Command::new(&self.command);
        cmd.current_dir(dir)
            .env("JOBROUTE_JOB_DIR", dir)
            .env("JOBROUTE_JOB_TYPE", self.job_type.as_str())
            .env("JOBROUTE_JOB_ID", job_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error =
            |e: std::io::Error| WorkerError::Processing(format!("cannot run {}: {e}", self.command.display()));

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    WorkerError::Processing(format!(
                        "{} worker timed out after {}s",
                        self.job_type,
                        limit.as_secs()
                    ))
                })?
                .map_err(spawn_error),
            None => cmd.output().await.map_err(spawn_error),
        }
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn process(&self, payload: &Payload) -> Result<PathBuf, WorkerError> {
        let dir = self.scratch_root.join(Uuid::new_v4().to_string());
        let io_error = |e: std::io::Error| WorkerError::Processing(format!("scratch dir: {e}"));
        tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;

        let body = serde_json::to_vec_pretty(payload)
            .map_err(|e| WorkerError::Processing(format!("serialize payload: {e}")))?;
        tokio::fs::write(dir.join("payload.json"), body)
            .await
            .map_err(io_error)?;

        let job_id = payload.job_id().map(|id| id.to_string()).unwrap_or_default();
        debug!(job_type = %self.job_type, %job_id, dir = %dir.display(), "running worker");

        let output = self.run(&dir, &job_id).await?;
        if !output.status.success() {
            return Err(WorkerError::Processing(format!(
                "{} worker exited with status {}: {}",
                self.job_type,
                output.status.code().unwrap_or(-1),
                stderr_tail(&output)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let reported = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| {
                WorkerError::Processing(format!("{} worker reported no artifact", self.job_type))
            })?;

        let artifact = {
            let path = PathBuf::from(reported);
            if path.is_relative() { dir.join(path) } else { path }
        };
        if !artifact.is_file() {
            return Err(WorkerError::Processing(format!(
                "{} worker reported missing artifact {}",
                self.job_type,
                artifact.display()
            )));
        }
        Ok(artifact)
    }

    async fn unload(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.scratch_root).await {
            warn!(job_type = %self.job_type, "scratch cleanup error: {e}");
        }
    }
}

/// Resolve relative command paths against the process CWD.
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_relative() {
        Ok(std::env::current_dir()?.join(path))
    } else {
        Ok(path.to_path_buf())
    }
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
