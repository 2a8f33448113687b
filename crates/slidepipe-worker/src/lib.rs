//! Slide ingestion worker.
//!
//! Consumes job messages from the queue and drives each job through
//! scanning, tiling and tile upload, recording every stage on the job record.

pub mod consumer;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod setup;

pub use consumer::{ConsumerConfig, JobConsumer};
pub use context::{PipelineSettings, WorkerContext};
pub use error::PipelineError;
pub use orchestrator::{JobOrchestrator, JobOutcome};
pub use queue::{Delivery, InMemoryJobQueue, JobMessage, JobQueue, PgJobQueue};
