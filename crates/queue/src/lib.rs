//! Crash-safe on-disk work queue with at-least-once delivery, used as the
//! sole hand-off between the producer and the consumer.

mod error;
mod store;
mod types;

pub use error::{QueueError, Result};
pub use store::Queue;
pub use types::{NewQueueRow, QueueCounts, QueueRow, QueueStatus};
