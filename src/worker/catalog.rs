//! Worker definitions loaded from TOML.
//!
//! Each file in the workers directory names a job type and the executable
//! that serves it:
//!
//! ```toml
//! [worker]
//! job_type = "TalkingHead"
//! command = "bin/talking-head"
//! warmup = "bin/talking-head-warmup"
//! timeout_secs = 1800
//! ```

use super::{CommandWorker, Worker, WorkerFactory};
use crate::error::{Error, Result, WorkerError};
use crate::model::JobType;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct WorkerFile {
    worker: WorkerDef,
}

/// How to run the worker for one job type.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerDef {
    pub job_type: JobType,
    /// Executable invoked once per job.
    pub command: PathBuf,
    /// Executable run once when the worker is constructed.
    pub warmup: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

/// All worker definitions, indexed by job type. Acts as the registry's
/// factory.
pub struct WorkerCatalog {
    defs: HashMap<JobType, WorkerDef>,
    work_dir: PathBuf,
}

impl WorkerCatalog {
    /// A catalog with no definitions. Every construction fails.
    pub fn empty(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            defs: HashMap::new(),
            work_dir: work_dir.into(),
        }
    }

    /// Load all `.toml` files from a directory.
    pub fn load_from_dir(dir: &Path, work_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut defs = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read workers dir {}: {e}", dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let file: WorkerFile = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("bad worker config {}: {e}", path.display()))
            })?;
            let def = file.worker;
            if !def.job_type.is_known() {
                return Err(Error::Config(format!(
                    "{}: job_type must name a routable job type",
                    path.display()
                )));
            }
            if defs.contains_key(&def.job_type) {
                return Err(Error::Config(format!(
                    "{}: duplicate worker for {}",
                    path.display(),
                    def.job_type
                )));
            }
            defs.insert(def.job_type, def);
        }

        Ok(Self {
            defs,
            work_dir: work_dir.into(),
        })
    }

    pub fn get(&self, job_type: JobType) -> Option<&WorkerDef> {
        self.defs.get(&job_type)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[async_trait]
impl WorkerFactory for WorkerCatalog {
    async fn construct(&self, job_type: JobType) -> std::result::Result<Arc<dyn Worker>, WorkerError> {
        let def = self.get(job_type).ok_or_else(|| WorkerError::Construction {
            job_type,
            reason: "no worker definition configured".to_string(),
        })?;
        let worker = CommandWorker::start(def, &self.work_dir).await?;
        Ok(Arc::new(worker))
    }
}
