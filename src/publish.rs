//! Completion publishing.

use crate::broker::Broker;
use crate::error::PublishError;
use crate::model::CompletionEvent;
use std::sync::Arc;
use tracing::info;

/// Emits completion events on the fanout exchange.
///
/// Fire-and-forget: durability is the broker's concern and nothing here
/// retries.
#[derive(Clone)]
pub struct CompletionPublisher {
    broker: Arc<dyn Broker>,
    exchange: String,
}

impl CompletionPublisher {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    /// Serialize and publish with an empty routing key.
    pub async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError> {
        let body = serde_json::to_vec(event)?;
        self.broker.publish(&self.exchange, "", &body).await?;
        info!(job_id = %event.job_id, status = %event.status, "completion published");
        Ok(())
    }
}
