//! Slidepipe Core Library
//!
//! This crate provides the job data model, configuration and storage types
//! shared across all slidepipe components.

pub mod config;
pub mod constants;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{BaseConfig, Config, WorkerConfig};
pub use models::{
    BlobLocation, ImageDescriptor, Job, JobStatus, ProcessingStatus, PyramidOutput,
    PyramidOutputs,
};
pub use storage_types::{BlobArea, StorageBackend};
