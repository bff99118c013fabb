//! In-memory stand-ins for the broker, workers and storage.

#![allow(dead_code)]

use async_trait::async_trait;
use jobroute_rs::broker::{Broker, ExchangeType};
use jobroute_rs::dispatch::Dispatcher;
use jobroute_rs::engine::{InboundDelivery, Pipeline};
use jobroute_rs::error::{Error, Result, StorageError, WorkerError};
use jobroute_rs::model::{CompletionEvent, JobId, JobType, Payload};
use jobroute_rs::publish::CompletionPublisher;
use jobroute_rs::storage::Storage;
use jobroute_rs::worker::{Worker, WorkerFactory, WorkerRegistry};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Records declarations as sets, so repeated setup is visibly idempotent.
#[derive(Default)]
pub struct MemoryBroker {
    pub exchanges: Mutex<BTreeMap<String, ExchangeType>>,
    pub queues: Mutex<BTreeSet<String>>,
    pub bindings: Mutex<BTreeSet<(String, String, String)>>,
    pub published: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub declare_calls: AtomicUsize,
    pub fail_publish: AtomicBool,
    pub fail_declare: AtomicBool,
}

impl MemoryBroker {
    /// Completion events published so far, decoded.
    pub fn completions(&self) -> Vec<CompletionEvent> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, body)| serde_json::from_slice(body).unwrap())
            .collect()
    }

    /// Raw JSON bodies published so far.
    pub fn published_json(&self) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, body)| serde_json::from_slice(body).unwrap())
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeType) -> Result<()> {
        self.declare_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_declare.load(Ordering::SeqCst) {
            return Err(Error::Other("broker unavailable".to_string()));
        }
        let mut exchanges = self.exchanges.lock().unwrap();
        match exchanges.get(name) {
            Some(existing) if *existing != kind => Err(Error::Other(format!(
                "exchange {name} redeclared with a different type"
            ))),
            _ => {
                exchanges.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.queues.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        if !self.queues.lock().unwrap().contains(queue) {
            return Err(Error::Other(format!("no queue {queue}")));
        }
        if !self.exchanges.lock().unwrap().contains_key(exchange) {
            return Err(Error::Other(format!("no exchange {exchange}")));
        }
        self.bindings.lock().unwrap().insert((
            queue.to_string(),
            exchange.to_string(),
            routing_key.to_string(),
        ));
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Other("channel closed".to_string()));
        }
        self.published.lock().unwrap().push((
            exchange.to_string(),
            routing_key.to_string(),
            body.to_vec(),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Worker returning a fixed outcome and counting calls.
pub struct FakeWorker {
    outcome: std::result::Result<PathBuf, String>,
    delay: Duration,
    gauge: Arc<Gauge>,
    events: Arc<Mutex<Vec<String>>>,
    pub calls: AtomicUsize,
    pub unloaded: AtomicBool,
}

/// Tracks how many `process` calls overlap.
#[derive(Default)]
pub struct Gauge {
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Worker for FakeWorker {
    async fn process(&self, _payload: &Payload) -> std::result::Result<PathBuf, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.leave();
        self.outcome.clone().map_err(WorkerError::Processing)
    }

    async fn unload(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
        self.events.lock().unwrap().push("unload".to_string());
    }
}

/// Factory building [`FakeWorker`]s.
///
/// The first `failures` constructions fail with "model unavailable".
pub struct FakeFactory {
    outcome: std::result::Result<PathBuf, String>,
    failures: AtomicUsize,
    delay: Duration,
    process_delay: Duration,
    pub gauge: Arc<Gauge>,
    /// Shared log of worker unloads and anything tests append.
    pub events: Arc<Mutex<Vec<String>>>,
    pub constructions: AtomicUsize,
    pub attempts: AtomicUsize,
    pub built: Mutex<Vec<Arc<FakeWorker>>>,
}

impl FakeFactory {
    pub fn succeeding(artifact: impl Into<PathBuf>) -> Self {
        Self::new(Ok(artifact.into()))
    }

    pub fn processing_error(reason: &str) -> Self {
        Self::new(Err(reason.to_string()))
    }

    fn new(outcome: std::result::Result<PathBuf, String>) -> Self {
        Self {
            outcome,
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
            process_delay: Duration::ZERO,
            gauge: Arc::new(Gauge::default()),
            events: Arc::new(Mutex::new(Vec::new())),
            constructions: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            built: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Delay each construction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay each `process` call on built workers.
    pub fn with_process_delay(mut self, delay: Duration) -> Self {
        self.process_delay = delay;
        self
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn process_calls(&self) -> usize {
        self.built
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.calls.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl WorkerFactory for FakeFactory {
    async fn construct(
        &self,
        job_type: JobType,
    ) -> std::result::Result<Arc<dyn Worker>, WorkerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(WorkerError::Construction {
                job_type,
                reason: "model unavailable".to_string(),
            });
        }
        self.constructions.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(FakeWorker {
            outcome: self.outcome.clone(),
            delay: self.process_delay,
            gauge: Arc::clone(&self.gauge),
            events: Arc::clone(&self.events),
            calls: AtomicUsize::new(0),
            unloaded: AtomicBool::new(false),
        });
        self.built.lock().unwrap().push(Arc::clone(&worker));
        Ok(worker)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Storage that records uploads and returns a deterministic URL.
#[derive(Default)]
pub struct RecordingStorage {
    pub fail: AtomicBool,
    pub uploads: Mutex<Vec<(JobId, JobType, PathBuf)>>,
}

impl RecordingStorage {
    pub fn failing() -> Self {
        let storage = Self::default();
        storage.fail.store(true, Ordering::SeqCst);
        storage
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn upload(
        &self,
        job_id: &JobId,
        job_type: JobType,
        local: &Path,
    ) -> std::result::Result<String, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("bucket unreachable")));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((job_id.clone(), job_type, local.to_path_buf()));
        Ok(format!("http://storage.test/{job_type}/{job_id}"))
    }
}

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

/// In-memory delivery. On ack it logs `ack:{label}` to `events` and records
/// how many completions had been published by then.
pub struct FakeDelivery {
    pub label: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub broker: Arc<MemoryBroker>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub published_at_ack: Arc<Mutex<Vec<(String, usize)>>>,
}

#[async_trait]
impl InboundDelivery for FakeDelivery {
    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn acknowledge(self) -> Result<()> {
        let published = self.broker.published.lock().unwrap().len();
        self.published_at_ack
            .lock()
            .unwrap()
            .push((self.label.clone(), published));
        self.events.lock().unwrap().push(format!("ack:{}", self.label));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

pub struct Harness {
    pub broker: Arc<MemoryBroker>,
    pub factory: Arc<FakeFactory>,
    pub storage: Arc<RecordingStorage>,
    pub pipeline: Arc<Pipeline>,
    /// `(label, completions published so far)` per acknowledged delivery.
    pub acks: Arc<Mutex<Vec<(String, usize)>>>,
}

impl Harness {
    /// A delivery whose ack is recorded in `acks` and in the factory's
    /// event log.
    pub fn delivery(&self, label: &str, routing_key: &str, body: &[u8]) -> FakeDelivery {
        FakeDelivery {
            label: label.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            broker: Arc::clone(&self.broker),
            events: Arc::clone(&self.factory.events),
            published_at_ack: Arc::clone(&self.acks),
        }
    }
}

pub fn harness(factory: FakeFactory, storage: RecordingStorage) -> Harness {
    let broker = Arc::new(MemoryBroker::default());
    let factory = Arc::new(factory);
    let storage = Arc::new(storage);
    let dispatcher = Dispatcher::new(
        WorkerRegistry::new(Arc::clone(&factory) as Arc<dyn WorkerFactory>),
        Arc::clone(&storage) as Arc<dyn Storage>,
    );
    let publisher =
        CompletionPublisher::new(Arc::clone(&broker) as Arc<dyn Broker>, "job-completions");
    Harness {
        broker,
        factory,
        storage,
        pipeline: Arc::new(Pipeline::new(Arc::new(dispatcher), publisher)),
        acks: Arc::new(Mutex::new(Vec::new())),
    }
}
