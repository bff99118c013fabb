//! Core data model.
//!
//! A job request arrives from the broker, is resolved to one of a closed set of
//! job types, and produces exactly one result that is published as a
//! completion event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Job Type
// ---------------------------------------------------------------------------

/// The kinds of work this worker recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    TalkingHead,
    VirtualTryOn,
    ImageToVideo,
    MotionTransfer,
    FaceSwap,
    /// Neither the routing key nor any type hint named a known type.
    Unknown,
}

/// Static routing facts for one known job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub job_type: JobType,
    /// Durable queue consumed for this type.
    pub queue: &'static str,
    /// Literal token searched for in routing keys and type hints.
    pub token: &'static str,
    /// Binding key on the request exchange. Contains `token`.
    pub binding_key: &'static str,
}

/// Routing table in resolution order. First match wins.
pub static ROUTES: [Route; 5] = [
    Route {
        job_type: JobType::TalkingHead,
        queue: "talking-head-queue",
        token: "TalkingHead",
        binding_key: "Jobs.Contracts.Messages:TalkingHeadRequest",
    },
    Route {
        job_type: JobType::VirtualTryOn,
        queue: "virtual-tryon-queue",
        token: "VirtualTryOn",
        binding_key: "Jobs.Contracts.Messages:VirtualTryOnRequest",
    },
    Route {
        job_type: JobType::ImageToVideo,
        queue: "img2video-queue",
        token: "ImageToVideo",
        binding_key: "Jobs.Contracts.Messages:ImageToVideoRequest",
    },
    Route {
        job_type: JobType::MotionTransfer,
        queue: "motion-transfer-queue",
        token: "MotionTransfer",
        binding_key: "Jobs.Contracts.Messages:MotionTransferRequest",
    },
    Route {
        job_type: JobType::FaceSwap,
        queue: "face-swap-queue",
        token: "FaceSwap",
        binding_key: "Jobs.Contracts.Messages:FaceSwapRequest",
    },
];

impl JobType {
    /// All known (routable) job types, in table order.
    pub fn known() -> impl Iterator<Item = JobType> {
        ROUTES.iter().map(|r| r.job_type)
    }

    /// Routing facts for this type. `None` for `Unknown`.
    pub fn route(self) -> Option<&'static Route> {
        ROUTES.iter().find(|r| r.job_type == self)
    }

    pub fn is_known(self) -> bool {
        self != JobType::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::TalkingHead => "TalkingHead",
            JobType::VirtualTryOn => "VirtualTryOn",
            JobType::ImageToVideo => "ImageToVideo",
            JobType::MotionTransfer => "MotionTransfer",
            JobType::FaceSwap => "FaceSwap",
            JobType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    /// Parses an exact type name. `Unknown` is not parseable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ROUTES
            .iter()
            .find(|r| r.token == s)
            .map(|r| r.job_type)
            .ok_or_else(|| format!("unknown job type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque job identifier as sent by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The inner job payload. Keys may be camelCase or PascalCase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Look up a field by its camelCase name, falling back to PascalCase.
    pub fn field(&self, camel: &str) -> Option<&Value> {
        self.0.get(camel).or_else(|| self.0.get(&pascal_case(camel)))
    }

    /// String field lookup with the same case fallback as [`Payload::field`].
    pub fn str_field(&self, camel: &str) -> Option<&str> {
        self.field(camel).and_then(Value::as_str)
    }

    /// The job identifier, from `jobId` or else `JobId`.
    ///
    /// Numeric identifiers are accepted and rendered as strings. Empty
    /// strings and other value kinds count as absent, so an unusable
    /// `jobId` does not hide a usable `JobId`.
    pub fn job_id(&self) -> Option<JobId> {
        ["jobId", "JobId"]
            .into_iter()
            .find_map(|key| match self.0.get(key)? {
                Value::String(s) if !s.is_empty() => Some(JobId::new(s.clone())),
                Value::Number(n) => Some(JobId::new(n.to_string())),
                _ => None,
            })
    }
}

fn pascal_case(camel: &str) -> String {
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Request / Result
// ---------------------------------------------------------------------------

/// One inbound job after decoding and resolution.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub job_type: JobType,
    pub payload: Payload,
    pub routing_key: String,
    pub type_hints: Vec<String>,
}

/// Terminal status of a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => f.write_str("COMPLETED"),
            JobStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Outcome of a dispatched job.
///
/// Fields are private so that exactly one of `output_url` / `error` is set,
/// matching `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    status: JobStatus,
    output_url: Option<String>,
    error: Option<String>,
    elapsed_ms: u64,
}

impl JobResult {
    pub fn completed(output_url: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            status: JobStatus::Completed,
            output_url: Some(output_url.into()),
            error: None,
            elapsed_ms,
        }
    }

    pub fn failed(error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            status: JobStatus::Failed,
            output_url: None,
            error: Some(error.into()),
            elapsed_ms,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn output_url(&self) -> Option<&str> {
        self.output_url.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }
}

/// Wire form of a job result on the completion exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

impl CompletionEvent {
    pub fn new(job_id: JobId, result: &JobResult) -> Self {
        Self {
            job_id,
            status: result.status,
            output_url: result.output_url.clone(),
            error: result.error.clone(),
            processing_time_ms: result.elapsed_ms,
        }
    }
}
