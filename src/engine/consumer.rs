//! Consumer loop: take deliveries from every job queue, run the pipeline,
//! acknowledge, and drain cleanly on shutdown.

use super::lifecycle::{Disposition, Pipeline, Stage};
use crate::error::{Error, Result};
use crate::telemetry::job::{record_stage, start_job_span};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One message taken off a job queue, acknowledged exactly once.
#[async_trait]
pub trait InboundDelivery: Send + Sync + 'static {
    fn routing_key(&self) -> &str;

    fn body(&self) -> &[u8];

    fn redelivered(&self) -> bool {
        false
    }

    /// Tell the broker the message is done with.
    async fn acknowledge(self) -> Result<()>;
}

/// Drives message consumption for all job queues.
///
/// At most `prefetch` handlers run at once. The broker-side prefetch limit
/// is channel-wide and equal to this value, so any further deliveries stay
/// queued at the broker, where other replicas can take them.
pub struct Consumer {
    pipeline: Arc<Pipeline>,
    prefetch: usize,
    shutdown: Arc<Notify>,
}

impl Clone for Consumer {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            prefetch: self.prefetch,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Consumer {
    pub fn new(pipeline: Arc<Pipeline>, prefetch: u16) -> Self {
        Self {
            pipeline,
            prefetch: usize::from(prefetch.max(1)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop taking deliveries.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Consume until shutdown, stream end or stream failure.
    ///
    /// In-flight handlers always run through acknowledgment before workers
    /// are unloaded. Closing the connection is left to the caller, after
    /// this returns.
    pub async fn run<S, D>(&self, mut deliveries: S) -> Result<()>
    where
        S: Stream<Item = Result<D>> + Unpin,
        D: InboundDelivery,
    {
        let permits = Arc::new(Semaphore::new(self.prefetch));
        let mut in_flight = JoinSet::new();
        let mut exit = Ok(());

        info!(prefetch = self.prefetch, "consumer started");

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.notified() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        exit = Err(Error::Other(format!("handler semaphore closed: {e}")));
                        break;
                    }
                },
            };

            let delivery = tokio::select! {
                _ = self.shutdown.notified() => break,
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!("delivery stream error: {e}");
                        exit = Err(e);
                        break;
                    }
                    None => {
                        warn!("delivery stream ended");
                        break;
                    }
                },
            };

            let pipeline = Arc::clone(&self.pipeline);
            in_flight.spawn(async move {
                let _permit = permit;
                handle_delivery(&pipeline, delivery).await;
            });

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("message handler panicked: {e}");
                }
            }
        }

        info!(in_flight = in_flight.len(), "consumer stopping, draining in-flight jobs");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("message handler panicked: {e}");
            }
        }

        self.pipeline.dispatcher().shutdown().await;
        info!("consumer stopped");
        exit
    }
}

/// Run the pipeline, then acknowledge. Never acks before the pipeline
/// returns, so a crash mid-job leaves the message for redelivery.
async fn handle_delivery<D: InboundDelivery>(pipeline: &Pipeline, delivery: D) {
    let routing_key = delivery.routing_key().to_string();
    if delivery.redelivered() {
        debug!(routing_key = %routing_key, "processing redelivered message");
    }

    let span = start_job_span(&routing_key);
    let disposition = pipeline
        .handle_in_span(&routing_key, delivery.body(), &span)
        .await;

    match delivery.acknowledge().await {
        Ok(()) => {
            record_stage(&span, disposition.final_stage(), Stage::Acknowledged);
            debug!(routing_key = %routing_key, ?disposition, "acknowledged");
        }
        Err(e) => error!(routing_key = %routing_key, ?disposition, "ack failed: {e}"),
    }

    if let Disposition::PublishFailed { ref job_id, .. } = disposition {
        warn!(%job_id, "acknowledged without a published completion");
    }
}
