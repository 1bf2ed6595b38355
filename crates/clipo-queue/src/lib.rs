//! Job queue for media processing jobs.
//!
//! This crate provides:
//! - The `JobQueue` trait: enqueue, blocking dequeue, ack, delayed nack
//! - Leases with heartbeats, so a crashed worker's job is redelivered
//! - Dead-lettering once a job has used up its attempts
//! - An in-memory queue and a Redis Streams queue

pub mod config;
pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;

use std::sync::Arc;

pub use config::{QueueBackend, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use memory::{DeadLetter, MemoryJobQueue};
pub use queue::{JobQueue, Redelivery};
pub use redis_queue::RedisJobQueue;

/// Build the queue selected by `config`.
pub async fn connect(config: &QueueConfig) -> QueueResult<Arc<dyn JobQueue>> {
    match config.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryJobQueue::from_config(config))),
        QueueBackend::Redis => {
            let queue = RedisJobQueue::new(config.clone())?;
            queue.init().await?;
            Ok(Arc::new(queue))
        }
    }
}
