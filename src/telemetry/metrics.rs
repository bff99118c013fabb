//! Metric instrument factories for jobroute-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"jobroute-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("jobroute-rs")
}

/// Counter: messages taken off any job queue.
pub fn messages_received() -> Counter<u64> {
    meter()
        .u64_counter("jobroute.messages.received")
        .with_description("Inbound job messages")
        .build()
}

/// Counter: messages dropped before dispatch.
/// Labels: `reason` ("decode" | "resolve" | "missing_job_id").
pub fn messages_rejected() -> Counter<u64> {
    meter()
        .u64_counter("jobroute.messages.rejected")
        .with_description("Messages not dispatched to a worker")
        .build()
}

/// Counter: dispatched jobs by outcome.
/// Labels: `job_type`, `status` ("completed" | "failed").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("jobroute.jobs.completed")
        .with_description("Dispatched jobs by final status")
        .build()
}

/// Histogram: dispatch wall time in milliseconds.
/// Labels: `job_type`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("jobroute.job.duration_ms")
        .with_description("Job dispatch duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: worker construction attempts.
/// Labels: `job_type`, `result` ("ok" | "error").
pub fn worker_constructions() -> Counter<u64> {
    meter()
        .u64_counter("jobroute.worker.constructions")
        .with_description("Worker construction attempts")
        .build()
}

/// Counter: completion events that could not be published.
pub fn publish_failures() -> Counter<u64> {
    meter()
        .u64_counter("jobroute.completions.publish_failures")
        .with_description("Completion events lost to publish errors")
        .build()
}

/// Counter: broker operations (declare, bind, publish).
/// Labels: `target`, `operation`.
pub fn broker_operations() -> Counter<u64> {
    meter()
        .u64_counter("jobroute.broker.operations")
        .with_description("Number of broker operations")
        .build()
}
