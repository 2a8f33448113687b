use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_types::BlobArea;

/// Where an image's bytes live.
///
/// Only ever built from a successful put receipt, so its presence on an
/// [`ImageDescriptor`] means the bytes are durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobLocation {
    pub url: String,
    pub key: String,
    pub etag: Option<String>,
    pub bucket: String,
    pub cdn_url: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub upload_success: bool,
    pub bucket_type: BlobArea,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub original_filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub blob_storage: Option<BlobLocation>,
}

impl ImageDescriptor {
    pub fn new(
        original_filename: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
            size_bytes,
            blob_storage: None,
        }
    }

    pub fn with_blob(mut self, location: BlobLocation) -> Self {
        self.blob_storage = Some(location);
        self
    }

    /// True when the image is stored but its CDN URL has not been recorded yet.
    pub fn needs_cdn_url(&self) -> bool {
        self.blob_storage
            .as_ref()
            .is_some_and(|location| location.cdn_url.is_none())
    }
}
