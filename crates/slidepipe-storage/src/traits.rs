//! Blob storage abstraction trait
//!
//! This module defines the [`BlobStorage`] trait the pipeline talks to, so the
//! orchestrator never depends on a concrete backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use slidepipe_core::{BlobArea, BlobLocation};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte stream of a stored object, as consumed by the malware scanner.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// What a successful put reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub url: String,
    pub key: String,
    pub etag: Option<String>,
    pub bucket: String,
    pub area: BlobArea,
}

impl UploadReceipt {
    /// Record this receipt on an image descriptor.
    ///
    /// Locations are only ever built here, i.e. after the backend confirmed the write.
    pub fn into_location(self, cdn_url: Option<String>) -> BlobLocation {
        BlobLocation {
            url: self.url,
            key: self.key,
            etag: self.etag,
            bucket: self.bucket,
            cdn_url,
            uploaded_at: Utc::now(),
            upload_success: true,
            bucket_type: self.area,
        }
    }
}

/// Blob storage abstraction trait
///
/// Originals go to the raw area through [`BlobStorage::upload_raw`], which
/// picks a single put or a multipart upload from the declared length. Derived
/// artifacts are small and always go through [`BlobStorage::upload_processed`].
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Upload an original into the raw area from a reader.
    ///
    /// `content_length` drives the single-put / multipart decision; `None`
    /// always streams as multipart.
    async fn upload_raw(
        &self,
        key: &str,
        content_type: &str,
        content_length: Option<u64>,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<UploadReceipt>;

    /// Upload an in-memory original into the raw area.
    async fn upload_raw_bytes(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<UploadReceipt> {
        let length = data.len() as u64;
        self.upload_raw(
            key,
            content_type,
            Some(length),
            Box::pin(std::io::Cursor::new(data)),
        )
        .await
    }

    /// Upload a derived artifact (tile, manifest) into the processed area.
    async fn upload_processed(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<UploadReceipt>;

    /// Stream an object's bytes without buffering the whole object.
    async fn get_stream(&self, area: BlobArea, key: &str) -> StorageResult<ByteStream>;

    /// Stream an object into `dest`, creating parent directories.
    ///
    /// A partially written file is removed when the transfer fails.
    async fn download_to_file(
        &self,
        area: BlobArea,
        key: &str,
        dest: &Path,
    ) -> StorageResult<PathBuf> {
        let start = std::time::Instant::now();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut stream = self.get_stream(area, key).await?;
        let mut file = tokio::fs::File::create(dest).await?;

        let copied: StorageResult<u64> = async {
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(written)
        }
        .await;

        match copied {
            Ok(size) => {
                tracing::info!(
                    area = %area,
                    key = %key,
                    path = %dest.display(),
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Download to file successful"
                );
                Ok(dest.to_path_buf())
            }
            Err(e) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(dest).await {
                    tracing::warn!(
                        path = %dest.display(),
                        error = %remove_err,
                        "Failed to remove partial download"
                    );
                }
                tracing::error!(area = %area, key = %key, error = %e, "Download to file failed");
                Err(e)
            }
        }
    }

    async fn exists(&self, area: BlobArea, key: &str) -> StorageResult<bool>;

    /// Keys of every object under `prefix`, sorted.
    async fn list(&self, area: BlobArea, prefix: &str) -> StorageResult<Vec<String>>;

    async fn delete(&self, area: BlobArea, key: &str) -> StorageResult<()>;

    /// Public CDN URL for a key. Derived from configuration, never queried.
    fn cdn_url(&self, key: &str) -> String;

    fn bucket(&self, area: BlobArea) -> &str;
}
