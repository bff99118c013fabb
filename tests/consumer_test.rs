//! Consumer loop over an in-memory delivery stream.

mod common;

use common::{FakeDelivery, FakeFactory, RecordingStorage, harness};
use futures::channel::mpsc;
use jobroute_rs::engine::Consumer;
use jobroute_rs::error::{Error, Result};
use jobroute_rs::model::JobType;
use std::sync::atomic::Ordering;
use std::time::Duration;

const FACE_SWAP_KEY: &str = "Jobs.Contracts.Messages:FaceSwapRequest";

fn job(id: &str) -> Vec<u8> {
    format!(r#"{{"jobId":"{id}","sourceImageUrl":"s","targetImageUrl":"t"}}"#).into_bytes()
}

#[tokio::test]
async fn each_delivery_is_acked_after_its_completion_is_published() {
    let h = harness(
        FakeFactory::succeeding("/tmp/out.png"),
        RecordingStorage::default(),
    );
    let (tx, rx) = mpsc::unbounded::<Result<FakeDelivery>>();
    for id in ["j0", "j1", "j2"] {
        tx.unbounded_send(Ok(h.delivery(id, FACE_SWAP_KEY, &job(id))))
            .unwrap();
    }
    drop(tx);

    Consumer::new(h.pipeline.clone(), 1).run(rx).await.unwrap();

    let acks = h.acks.lock().unwrap().clone();
    assert_eq!(
        acks,
        vec![
            ("j0".to_string(), 1),
            ("j1".to_string(), 2),
            ("j2".to_string(), 3),
        ]
    );
}

#[tokio::test]
async fn undecodable_delivery_is_still_acked() {
    let h = harness(
        FakeFactory::succeeding("/tmp/out.png"),
        RecordingStorage::default(),
    );
    let (tx, rx) = mpsc::unbounded::<Result<FakeDelivery>>();
    tx.unbounded_send(Ok(h.delivery("bad", FACE_SWAP_KEY, b"{not json")))
        .unwrap();
    drop(tx);

    Consumer::new(h.pipeline.clone(), 1).run(rx).await.unwrap();

    assert_eq!(h.acks.lock().unwrap().clone(), vec![("bad".to_string(), 0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_handlers_never_exceed_prefetch() {
    let h = harness(
        FakeFactory::succeeding("/tmp/out.png").with_process_delay(Duration::from_millis(50)),
        RecordingStorage::default(),
    );
    let (tx, rx) = mpsc::unbounded::<Result<FakeDelivery>>();
    for i in 0..6 {
        let id = format!("j{i}");
        tx.unbounded_send(Ok(h.delivery(&id, FACE_SWAP_KEY, &job(&id))))
            .unwrap();
    }
    drop(tx);

    Consumer::new(h.pipeline.clone(), 2).run(rx).await.unwrap();

    assert_eq!(h.factory.gauge.peak.load(Ordering::SeqCst), 2);
    assert_eq!(h.acks.lock().unwrap().len(), 6);
    assert_eq!(h.broker.completions().len(), 6);
    assert_eq!(h.factory.constructions(), 1);
}

#[tokio::test]
async fn shutdown_drains_in_flight_job_before_unloading_workers() {
    let h = harness(
        FakeFactory::succeeding("/tmp/out.png").with_process_delay(Duration::from_millis(300)),
        RecordingStorage::default(),
    );
    let consumer = Consumer::new(h.pipeline.clone(), 1);
    let (tx, rx) = mpsc::unbounded::<Result<FakeDelivery>>();

    let running = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run(rx).await })
    };

    tx.unbounded_send(Ok(h.delivery("slow", FACE_SWAP_KEY, &job("slow"))))
        .unwrap();
    tx.unbounded_send(Ok(h.delivery("queued", FACE_SWAP_KEY, &job("queued"))))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    consumer.shutdown();
    running.await.unwrap().unwrap();

    let events = h.factory.events.lock().unwrap().clone();
    assert_eq!(events, vec!["ack:slow".to_string(), "unload".to_string()]);
    assert_eq!(h.acks.lock().unwrap().clone(), vec![("slow".to_string(), 1)]);
    assert_eq!(h.factory.process_calls(), 1);
    assert!(
        !h.pipeline
            .dispatcher()
            .registry()
            .is_loaded(JobType::FaceSwap)
            .await
    );
}

#[tokio::test]
async fn stream_error_stops_intake_after_draining() {
    let h = harness(
        FakeFactory::succeeding("/tmp/out.png"),
        RecordingStorage::default(),
    );
    let (tx, rx) = mpsc::unbounded::<Result<FakeDelivery>>();
    tx.unbounded_send(Ok(h.delivery("j0", FACE_SWAP_KEY, &job("j0"))))
        .unwrap();
    tx.unbounded_send(Err(Error::Other("channel closed".to_string())))
        .unwrap();
    tx.unbounded_send(Ok(h.delivery("j1", FACE_SWAP_KEY, &job("j1"))))
        .unwrap();

    let result = Consumer::new(h.pipeline.clone(), 1).run(rx).await;

    assert!(result.is_err());
    assert_eq!(h.acks.lock().unwrap().clone(), vec![("j0".to_string(), 1)]);
}
