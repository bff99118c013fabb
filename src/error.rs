//! Error types for jobroute-rs.
//!
//! `Error` covers startup and transport failures. Each pipeline stage has its
//! own error type so that per-message failures are handled where they occur.

use crate::model::JobType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The message body could not be turned into a payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not valid UTF-8 JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("body is not a JSON object")]
    NotAnObject,

    #[error("envelope `message` is empty or not an object")]
    EmptyEnvelope,
}

/// Neither the routing key nor the type hints named a known job type.
#[derive(Debug, Error)]
#[error("cannot resolve job type from routing key {routing_key:?} or type hints {hints:?}")]
pub struct ResolutionError {
    pub routing_key: String,
    pub hints: Vec<String>,
}

/// Failures raised by a worker capability.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("failed to construct {job_type} worker: {reason}")]
    Construction { job_type: JobType, reason: String },

    /// Text is forwarded verbatim into the completion event.
    #[error("{0}")]
    Processing(String),
}

/// Artifact upload failed after successful processing.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact not found: {0}")]
    MissingArtifact(String),

    #[error("upload failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A completion event could not be published.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("serialize completion: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish completion: {0}")]
    Broker(#[from] Error),
}
