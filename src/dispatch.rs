//! Dispatch: registry lookup, worker invocation, upload.

use crate::model::{JobRequest, JobResult, JobStatus};
use crate::storage::Storage;
use crate::telemetry::metrics;
use crate::worker::WorkerRegistry;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Runs one job end to end. Owns the worker registry.
pub struct Dispatcher {
    registry: WorkerRegistry,
    storage: Arc<dyn Storage>,
}

impl Dispatcher {
    pub fn new(registry: WorkerRegistry, storage: Arc<dyn Storage>) -> Self {
        Self { registry, storage }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Dispatch one job. Never fails: any construction, processing or upload
    /// error becomes a FAILED result.
    pub async fn dispatch(&self, request: &JobRequest) -> JobResult {
        let start = Instant::now();
        let outcome = self.run(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(url) => {
                info!(job_id = %request.job_id, job_type = %request.job_type, elapsed_ms, "job completed");
                JobResult::completed(url, elapsed_ms)
            }
            Err(reason) => {
                error!(job_id = %request.job_id, job_type = %request.job_type, elapsed_ms, error = %reason, "job failed");
                JobResult::failed(reason, elapsed_ms)
            }
        };

        record(request, &result);
        result
    }

    async fn run(&self, request: &JobRequest) -> Result<String, String> {
        let worker = self
            .registry
            .get_or_construct(request.job_type)
            .await
            .map_err(|e| e.to_string())?;

        let artifact = worker
            .process(&request.payload)
            .await
            .map_err(|e| e.to_string())?;

        self.storage
            .upload(&request.job_id, request.job_type, &artifact)
            .await
            .map_err(|e| e.to_string())
    }

    /// Release every constructed worker.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

fn record(request: &JobRequest, result: &JobResult) {
    let status = match result.status() {
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    };
    metrics::jobs_finished().add(
        1,
        &[
            KeyValue::new("job_type", request.job_type.as_str()),
            KeyValue::new("status", status),
        ],
    );
    metrics::job_duration_ms().record(
        result.elapsed_ms() as f64,
        &[KeyValue::new("job_type", request.job_type.as_str())],
    );
}
