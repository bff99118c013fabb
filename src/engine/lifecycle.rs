//! Per-message lifecycle: decode, resolve, dispatch, publish.
//!
//! ```text
//! Received -> Decoded -> Resolved -> Dispatched -> Published -> Acknowledged
//!    |           |
//!    |           +-> ResolveFailed -> Published (jobId known) -> Acknowledged
//!    |                             -> Acknowledged (no jobId)
//!    +-> DecodeFailed -> Acknowledged
//! ```
//!
//! Acknowledgment itself belongs to the consumer, which acks only after
//! [`Pipeline::handle`] returns.

use crate::dispatch::Dispatcher;
use crate::envelope;
use crate::error::ResolutionError;
use crate::model::{CompletionEvent, JobId, JobRequest, JobResult, JobStatus};
use crate::publish::CompletionPublisher;
use crate::resolve;
use crate::telemetry::job::{record_stage, start_job_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span, error, info, warn};

/// Lifecycle states of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    Resolved,
    Dispatched,
    Published,
    DecodeFailed,
    ResolveFailed,
    Acknowledged,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::Resolved => "resolved",
            Stage::Dispatched => "dispatched",
            Stage::Published => "published",
            Stage::DecodeFailed => "decode_failed",
            Stage::ResolveFailed => "resolve_failed",
            Stage::Acknowledged => "acknowledged",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How handling of one message ended. Every variant is safe to acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A completion event was published.
    Published { job_id: JobId, status: JobStatus },
    /// The job ran (or failed resolution) but its completion could not be
    /// published. The job is lost to the requester.
    PublishFailed { job_id: JobId, status: JobStatus },
    /// The body could not be decoded. Nothing was published.
    DecodeFailed,
    /// No job type could be resolved and there is no job id to report to.
    Unresolved,
    /// Resolved, but the payload carries no job id. Not dispatched.
    MissingJobId,
}

impl Disposition {
    /// The last lifecycle stage reached before acknowledgment.
    pub fn final_stage(&self) -> Stage {
        match self {
            Disposition::Published { .. } => Stage::Published,
            Disposition::PublishFailed { .. } => Stage::Dispatched,
            Disposition::DecodeFailed => Stage::DecodeFailed,
            Disposition::Unresolved => Stage::ResolveFailed,
            Disposition::MissingJobId => Stage::Resolved,
        }
    }
}

/// Wires decoder, resolver, dispatcher and publisher for each message.
pub struct Pipeline {
    dispatcher: Arc<Dispatcher>,
    publisher: CompletionPublisher,
}

impl Pipeline {
    pub fn new(dispatcher: Arc<Dispatcher>, publisher: CompletionPublisher) -> Self {
        Self {
            dispatcher,
            publisher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run one message through the pipeline.
    pub async fn handle(&self, routing_key: &str, body: &[u8]) -> Disposition {
        let span = start_job_span(routing_key);
        self.handle_in_span(routing_key, body, &span).await
    }

    /// Like [`Pipeline::handle`], inside a caller-owned job span so the
    /// caller can record later stages (acknowledgment) on the same span.
    pub async fn handle_in_span(&self, routing_key: &str, body: &[u8], span: &Span) -> Disposition {
        self.handle_in(routing_key, body, span)
            .instrument(span.clone())
            .await
    }

    async fn handle_in(&self, routing_key: &str, body: &[u8], span: &Span) -> Disposition {
        let received = Instant::now();
        metrics::messages_received().add(1, &[]);

        let envelope = match envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                record_stage(span, Stage::Received, Stage::DecodeFailed);
                error!(
                    routing_key,
                    error = %e,
                    body = %preview(body),
                    "dropping undecodable message"
                );
                reject("decode");
                return Disposition::DecodeFailed;
            }
        };
        record_stage(span, Stage::Received, Stage::Decoded);

        let job_id = envelope.payload.job_id();
        if let Some(ref id) = job_id {
            span.record("job.id", id.as_str());
        }

        let job_type = match resolve::resolve_known(routing_key, &envelope.type_hints) {
            Ok(job_type) => job_type,
            Err(e) => {
                record_stage(span, Stage::Decoded, Stage::ResolveFailed);
                reject("resolve");
                return self.unresolved(job_id, e, received, span).await;
            }
        };
        span.record("job.type", job_type.as_str());
        record_stage(span, Stage::Decoded, Stage::Resolved);

        let Some(job_id) = job_id else {
            warn!(
                routing_key,
                %job_type,
                message_id = envelope.message_id.as_deref().unwrap_or("-"),
                "payload has no jobId, not dispatching"
            );
            reject("missing_job_id");
            return Disposition::MissingJobId;
        };

        info!(%job_id, %job_type, "processing job");
        let request = JobRequest {
            job_id,
            job_type,
            payload: envelope.payload,
            routing_key: routing_key.to_string(),
            type_hints: envelope.type_hints,
        };

        let result = self.dispatcher.dispatch(&request).await;
        record_stage(span, Stage::Resolved, Stage::Dispatched);

        self.complete(request.job_id, &result, Stage::Dispatched, span)
            .await
    }

    async fn unresolved(
        &self,
        job_id: Option<JobId>,
        cause: ResolutionError,
        received: Instant,
        span: &Span,
    ) -> Disposition {
        warn!(error = %cause, "unresolvable job type");
        match job_id {
            Some(job_id) => {
                let result =
                    JobResult::failed(cause.to_string(), received.elapsed().as_millis() as u64);
                self.complete(job_id, &result, Stage::ResolveFailed, span)
                    .await
            }
            None => Disposition::Unresolved,
        }
    }

    async fn complete(
        &self,
        job_id: JobId,
        result: &JobResult,
        from: Stage,
        span: &Span,
    ) -> Disposition {
        let event = CompletionEvent::new(job_id, result);
        match self.publisher.publish(&event).await {
            Ok(()) => {
                record_stage(span, from, Stage::Published);
                Disposition::Published {
                    job_id: event.job_id,
                    status: event.status,
                }
            }
            Err(e) => {
                metrics::publish_failures().add(1, &[]);
                error!(job_id = %event.job_id, error = %e, "completion publish failed, job result lost");
                Disposition::PublishFailed {
                    job_id: event.job_id,
                    status: event.status,
                }
            }
        }
    }
}

fn reject(reason: &'static str) {
    metrics::messages_rejected().add(1, &[KeyValue::new("reason", reason)]);
}

/// First 500 bytes of a body, for logs.
fn preview(body: &[u8]) -> String {
    let end = body.len().min(500);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
