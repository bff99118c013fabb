//! Job handling span helpers.

use crate::engine::Stage;
use tracing::Span;

/// Start a span covering one inbound message.
///
/// `job.id` and `job.type` are declared empty and recorded once decoding
/// and resolution have produced them.
pub fn start_job_span(routing_key: &str) -> Span {
    tracing::info_span!(
        "job.handle",
        "messaging.system" = "rabbitmq",
        "messaging.rabbitmq.destination.routing_key" = routing_key,
        "job.id" = tracing::field::Empty,
        "job.type" = tracing::field::Empty,
    )
}

/// Emit a `stage_transition` event scoped to the given span.
pub fn record_stage(span: &Span, from: Stage, to: Stage) {
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "stage_transition");
    });
}
