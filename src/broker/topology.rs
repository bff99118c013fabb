//! Exchange, queue and binding setup.

use super::{Broker, ExchangeType};
use crate::error::Result;
use crate::model::ROUTES;
use tracing::info;

/// Topic exchange carrying job requests.
pub const REQUEST_EXCHANGE: &str = "job-requests";
/// Fanout exchange carrying completion events.
pub const COMPLETION_EXCHANGE: &str = "job-completions";

/// Declares everything the worker consumes from and publishes to.
#[derive(Debug, Clone)]
pub struct Topology {
    pub request_exchange: String,
    pub completion_exchange: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            request_exchange: REQUEST_EXCHANGE.to_string(),
            completion_exchange: COMPLETION_EXCHANGE.to_string(),
        }
    }
}

impl Topology {
    /// Declare both exchanges and one bound queue per known job type.
    ///
    /// Must complete before consumption starts. Any failure is returned
    /// unretried; callers treat it as fatal.
    pub async fn setup(&self, broker: &dyn Broker) -> Result<()> {
        broker
            .declare_exchange(&self.request_exchange, ExchangeType::Topic)
            .await?;
        info!(exchange = %self.request_exchange, "declared request exchange (topic)");

        broker
            .declare_exchange(&self.completion_exchange, ExchangeType::Fanout)
            .await?;
        info!(exchange = %self.completion_exchange, "declared completion exchange (fanout)");

        for route in &ROUTES {
            broker.declare_queue(route.queue).await?;
            broker
                .bind_queue(route.queue, &self.request_exchange, route.binding_key)
                .await?;
            info!(
                queue = route.queue,
                routing_key = route.binding_key,
                job_type = %route.job_type,
                "bound job queue"
            );
        }

        Ok(())
    }
}
