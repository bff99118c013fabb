//! AMQP 0-9-1 broker over lapin.

use super::{Broker, ExchangeType};
use crate::engine::InboundDelivery;
use crate::error::{Error, Result};
use crate::model::ROUTES;
use crate::telemetry::metrics;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

/// Persistent delivery mode for published messages.
const PERSISTENT: u8 = 2;

/// One connection with one channel, shared by topology, consumers and the
/// completion publisher.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect and open the channel, applying the consumer prefetch limit.
    pub async fn connect(url: &str, prefetch: u16) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel.basic_qos(prefetch, qos_options()).await?;
        info!(prefetch, "connected to broker");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// Start one consumer per job queue and merge their deliveries.
    pub async fn consume_all(&self) -> Result<BoxStream<'static, Result<Delivery>>> {
        let mut consumers = Vec::with_capacity(ROUTES.len());
        for route in &ROUTES {
            let consumer = self
                .channel
                .basic_consume(
                    route.queue,
                    &format!("jobroute-{}", route.queue),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            info!(queue = route.queue, "listening");
            consumers.push(consumer);
        }
        Ok(futures::stream::select_all(consumers)
            .map(|next| next.map_err(Error::from))
            .boxed())
    }

    /// Close channel, then connection. Errors are logged, not returned.
    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "shutdown").await {
            warn!("channel close error: {e}");
        }
        if let Err(e) = self.connection.close(200, "shutdown").await {
            warn!("connection close error: {e}");
        }
        info!("broker connection closed");
    }
}

/// The prefetch limit applies to the whole channel, shared by all five
/// queue consumers, rather than to each consumer.
fn qos_options() -> BasicQosOptions {
    BasicQosOptions { global: true }
}

fn record(target: &str, operation: &'static str) {
    metrics::broker_operations().add(
        1,
        &[
            KeyValue::new("target", target.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeType) -> Result<()> {
        let kind = match kind {
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Fanout => ExchangeKind::Fanout,
        };
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        record(name, "declare_exchange");
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        record(name, "declare_queue");
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        record(queue, "bind");
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;
        record(exchange, "publish");
        debug!(exchange, routing_key, bytes = body.len(), "published");
        Ok(())
    }
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn routing_key(&self) -> &str {
        self.routing_key.as_str()
    }

    fn body(&self) -> &[u8] {
        &self.data
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn acknowledge(self) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}
