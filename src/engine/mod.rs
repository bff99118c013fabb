//! Message engine: per-message lifecycle and the broker consumer loop.

pub mod consumer;
pub mod lifecycle;

pub use consumer::{Consumer, InboundDelivery};
pub use lifecycle::{Disposition, Pipeline, Stage};
