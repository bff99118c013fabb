//! # jobroute-rs
//!
//! Job routing core for an AI generation worker.
//!
//! Consumes job requests from a RabbitMQ topic exchange, resolves each to a
//! job type, runs it on a lazily constructed per-type worker, uploads the
//! artifact and publishes a completion event to a fanout exchange.

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod model;
pub mod publish;
pub mod resolve;
pub mod storage;
pub mod telemetry;
pub mod worker;
