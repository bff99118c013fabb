//! Worker capabilities and the per-type worker registry.
//!
//! A worker turns a job payload into a local artifact. Workers can be
//! expensive to build (model weights, GPU state), so the registry builds
//! each one on first use and keeps it until shutdown.

pub mod catalog;
pub mod command;

use crate::error::WorkerError;
use crate::model::{JobType, Payload};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use catalog::{WorkerCatalog, WorkerDef};
pub use command::CommandWorker;

/// A constructed worker for one job type.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Run the job and return the path of the produced artifact.
    async fn process(&self, payload: &Payload) -> Result<PathBuf, WorkerError>;

    /// Release held resources. Called once at registry shutdown.
    async fn unload(&self) {}
}

/// Builds workers on demand.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn construct(&self, job_type: JobType) -> Result<Arc<dyn Worker>, WorkerError>;
}

type Slot = Mutex<Option<Arc<dyn Worker>>>;

/// Lazily populated map from job type to worker.
///
/// Each known type has its own slot lock, held across construction, so two
/// concurrent first dispatches of one type build a single worker while other
/// types proceed independently. Failed constructions leave the slot empty and
/// the next dispatch retries.
pub struct WorkerRegistry {
    factory: Arc<dyn WorkerFactory>,
    slots: HashMap<JobType, Slot>,
}

impl WorkerRegistry {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        let slots = JobType::known().map(|t| (t, Mutex::new(None))).collect();
        Self { factory, slots }
    }

    /// Return the worker for `job_type`, constructing it if absent.
    pub async fn get_or_construct(&self, job_type: JobType) -> Result<Arc<dyn Worker>, WorkerError> {
        let slot = self
            .slots
            .get(&job_type)
            .ok_or_else(|| WorkerError::Construction {
                job_type,
                reason: "no worker exists for this job type".to_string(),
            })?;

        let mut guard = slot.lock().await;
        if let Some(worker) = guard.as_ref() {
            return Ok(Arc::clone(worker));
        }

        info!(%job_type, "constructing worker");
        match self.factory.construct(job_type).await {
            Ok(worker) => {
                *guard = Some(Arc::clone(&worker));
                record_construction(job_type, "ok");
                info!(%job_type, "worker ready");
                Ok(worker)
            }
            Err(e) => {
                record_construction(job_type, "error");
                warn!(%job_type, error = %e, "worker construction failed");
                Err(e)
            }
        }
    }

    /// Whether a worker for `job_type` is currently held.
    pub async fn is_loaded(&self, job_type: JobType) -> bool {
        match self.slots.get(&job_type) {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Unload and drop every held worker.
    pub async fn shutdown(&self) {
        for job_type in JobType::known() {
            let Some(slot) = self.slots.get(&job_type) else {
                continue;
            };
            let worker = slot.lock().await.take();
            if let Some(worker) = worker {
                worker.unload().await;
                info!(%job_type, "worker unloaded");
            }
        }
    }
}

fn record_construction(job_type: JobType, result: &'static str) {
    metrics::worker_constructions().add(
        1,
        &[
            KeyValue::new("job_type", job_type.as_str()),
            KeyValue::new("result", result),
        ],
    );
}
