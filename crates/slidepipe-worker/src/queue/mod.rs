//! At-least-once job queue.
//!
//! Publishers put `{"job_id": ...}` messages on a topic. A consumer claims one
//! message at a time; a claimed message stays invisible for the visibility
//! timeout and is redelivered unless acknowledged before it expires.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryJobQueue;
pub use postgres::PgJobQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: String,
}

impl JobMessage {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}

/// A claimed message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub payload: serde_json::Value,
    /// How many times this message has been handed out, this delivery included.
    pub delivery_count: u32,
}

impl Delivery {
    pub fn message(&self) -> Result<JobMessage, serde_json::Error> {
        JobMessage::deserialize(&self.payload)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, message: &JobMessage) -> Result<i64>;

    /// Claim the oldest visible message, if any.
    async fn receive(&self) -> Result<Option<Delivery>>;

    /// Remove a delivered message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Resolves when new messages may have been published.
    async fn notified(&self);
}
