//! Slidepipe Storage Library
//!
//! Blob storage for the ingestion pipeline. Two areas are addressed:
//!
//! - **raw**: private originals as uploaded (`uploads/{job_id}/...`)
//! - **processed**: web-servable derived artifacts (tiles and DZI manifests)
//!
//! Both areas are backed by `object_store` (S3 in production, the local
//! filesystem for development, in-memory stores in tests). Key generation is
//! centralized in the `keys` module so every caller uses the same layout.

pub mod factory;
pub mod keys;
pub mod object;
pub mod policy;
pub mod traits;

// Re-export commonly used types
pub use factory::create_blob_storage;
pub use object::{AreaStore, ObjectBlobStore};
pub use policy::{UploadPolicy, UploadStrategy};
pub use slidepipe_core::{BlobArea, StorageBackend};
pub use traits::{BlobStorage, ByteStream, StorageError, StorageResult, UploadReceipt};
