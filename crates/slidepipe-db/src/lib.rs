//! Persistence for slide ingestion jobs.
//!
//! `JobStore` is the seam the worker depends on. `PgJobRepository` backs it
//! with the `upload_jobs` table; `InMemoryJobStore` backs it in tests and
//! local runs without a database.

pub mod db;

pub use db::{connect_and_migrate, InMemoryJobStore, JobStore, PgJobRepository};
