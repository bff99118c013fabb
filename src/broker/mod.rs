//! Broker access: exchange/queue declaration, bindings and publishing.
//!
//! The pipeline only needs the operations on [`Broker`]; consuming is done
//! by the engine directly against the AMQP channel.

pub mod amqp;
pub mod topology;

use crate::error::Result;
use async_trait::async_trait;

pub use amqp::AmqpBroker;
pub use topology::{Topology, COMPLETION_EXCHANGE, REQUEST_EXCHANGE};

/// Exchange routing semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    /// Routes by routing-key pattern.
    Topic,
    /// Delivers to every bound queue, ignoring the routing key.
    Fanout,
}

/// Broker operations used by topology setup and completion publishing.
///
/// All declarations are durable and must be idempotent: declaring something
/// that already exists with the same settings is not an error.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_exchange(&self, name: &str, kind: ExchangeType) -> Result<()>;

    async fn declare_queue(&self, name: &str) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Publish a persistent JSON message.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()>;
}
