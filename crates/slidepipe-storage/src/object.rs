//! `object_store`-backed implementation of [`BlobStorage`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, Error as ObjectStoreError, ObjectStore, ObjectStoreExt, PutPayload,
    PutResult, WriteMultipart,
};
use slidepipe_core::BlobArea;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::keys::{self, validate_key};
use crate::policy::{UploadPolicy, UploadStrategy};
use crate::traits::{BlobStorage, ByteStream, StorageError, StorageResult, UploadReceipt};

const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// One blob area: the store, the bucket name recorded on receipts, and the
/// base of the direct (non-CDN) object URL.
#[derive(Clone)]
pub struct AreaStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    base_url: String,
    /// `LocalFileSystem` rejects object attributes, so content types are only sent when supported.
    supports_attributes: bool,
}

impl AreaStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            supports_attributes: true,
        }
    }

    pub fn without_attributes(mut self) -> Self {
        self.supports_attributes = false;
        self
    }

    /// An empty in-memory area, for tests and dry runs.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let base_url = format!("memory://{}", bucket);
        Self::new(Arc::new(InMemory::new()), bucket, base_url)
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn attributes(&self, content_type: &str) -> Attributes {
        let mut attributes = Attributes::new();
        if self.supports_attributes {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        attributes
    }
}

/// Blob storage over two `object_store` areas.
#[derive(Clone)]
pub struct ObjectBlobStore {
    raw: AreaStore,
    processed: AreaStore,
    cdn_domain: String,
    policy: UploadPolicy,
}

impl ObjectBlobStore {
    pub fn new(
        raw: AreaStore,
        processed: AreaStore,
        cdn_domain: impl Into<String>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            raw,
            processed,
            cdn_domain: cdn_domain.into(),
            policy,
        }
    }

    /// Both areas in memory with the default upload policy.
    pub fn in_memory(cdn_domain: impl Into<String>) -> Self {
        Self::new(
            AreaStore::in_memory("raw"),
            AreaStore::in_memory("processed"),
            cdn_domain,
            UploadPolicy::default(),
        )
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    fn area(&self, area: BlobArea) -> &AreaStore {
        match area {
            BlobArea::Raw => &self.raw,
            BlobArea::Processed => &self.processed,
        }
    }

    fn receipt(
        area_store: &AreaStore,
        area: BlobArea,
        key: &str,
        put: PutResult,
    ) -> UploadReceipt {
        UploadReceipt {
            url: area_store.url(key),
            key: key.to_string(),
            etag: put.e_tag,
            bucket: area_store.bucket.clone(),
            area,
        }
    }

    async fn put_single(
        &self,
        area_store: &AreaStore,
        location: &Path,
        content_type: &str,
        data: Bytes,
    ) -> Result<PutResult, ObjectStoreError> {
        area_store
            .store
            .put_opts(
                location,
                PutPayload::from(data),
                area_store.attributes(content_type).into(),
            )
            .await
    }

    async fn put_multipart(
        &self,
        area_store: &AreaStore,
        location: &Path,
        content_type: &str,
        head: Vec<u8>,
        reader: &mut Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<(PutResult, u64)> {
        let upload = area_store
            .store
            .put_multipart_opts(location, area_store.attributes(content_type).into())
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.policy.part_size_bytes);

        let copied: StorageResult<u64> = async {
            let mut total = head.len() as u64;
            if !head.is_empty() {
                writer.write(&head);
            }
            let mut buffer = vec![0u8; READ_BUFFER_BYTES];
            loop {
                let read = reader.read(&mut buffer).await.map_err(|e| {
                    StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
                })?;
                if read == 0 {
                    break;
                }
                writer
                    .wait_for_capacity(self.policy.max_concurrency)
                    .await
                    .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
                writer.write(&buffer[..read]);
                total += read as u64;
            }
            Ok(total)
        }
        .await;

        match copied {
            Ok(total) => {
                let put = writer
                    .finish()
                    .await
                    .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
                Ok((put, total))
            }
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(
                        key = %location,
                        error = %abort_err,
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl BlobStorage for ObjectBlobStore {
    #[tracing::instrument(skip(self, reader), fields(bucket = %self.raw.bucket))]
    async fn upload_raw(
        &self,
        key: &str,
        content_type: &str,
        content_length: Option<u64>,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<UploadReceipt> {
        validate_key(key)?;
        let area_store = &self.raw;
        let location = Path::from(key);
        let start = Instant::now();
        let strategy = self.policy.strategy_for(content_length);

        let result = match strategy {
            UploadStrategy::Single => {
                // Never buffer more than the threshold, whatever length was declared.
                let threshold = self.policy.multipart_threshold_bytes;
                let capacity = content_length.unwrap_or(0) as usize;
                let mut buffer = Vec::with_capacity(capacity);
                (&mut reader)
                    .take(threshold.saturating_add(1))
                    .read_to_end(&mut buffer)
                    .await
                    .map_err(|e| {
                        StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
                    })?;

                if buffer.len() as u64 > threshold {
                    tracing::warn!(
                        key = %key,
                        declared_bytes = ?content_length,
                        threshold_bytes = threshold,
                        "Stream is longer than declared, switching to multipart"
                    );
                    self.put_multipart(area_store, &location, content_type, buffer, &mut reader)
                        .await
                } else {
                    let size = buffer.len() as u64;
                    self.put_single(area_store, &location, content_type, Bytes::from(buffer))
                        .await
                        .map(|put| (put, size))
                        .map_err(|e| StorageError::UploadFailed(e.to_string()))
                }
            }
            UploadStrategy::Multipart => {
                self.put_multipart(area_store, &location, content_type, Vec::new(), &mut reader)
                    .await
            }
        };

        let (put, size) = result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %area_store.bucket,
                key = %key,
                strategy = ?strategy,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Raw upload failed"
            );
            e
        })?;

        if let Some(expected) = content_length {
            if expected != size {
                tracing::warn!(
                    key = %key,
                    expected_bytes = expected,
                    size_bytes = size,
                    "Uploaded size differs from declared content length"
                );
            }
        }

        tracing::info!(
            bucket = %area_store.bucket,
            key = %key,
            size_bytes = size,
            strategy = ?strategy,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Raw upload successful"
        );

        Ok(Self::receipt(area_store, BlobArea::Raw, key, put))
    }

    async fn upload_processed(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<UploadReceipt> {
        validate_key(key)?;
        let area_store = &self.processed;
        let location = Path::from(key);
        let size = data.len() as u64;
        let start = Instant::now();

        let put = self
            .put_single(area_store, &location, content_type, data)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %area_store.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Processed upload failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::debug!(
            bucket = %area_store.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Processed upload successful"
        );

        Ok(Self::receipt(area_store, BlobArea::Processed, key, put))
    }

    async fn get_stream(&self, area: BlobArea, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let area_store = self.area(area);
        let location = Path::from(key);

        let result = area_store.store.get(&location).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %area_store.bucket,
                    key = %key,
                    "Stream download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let stream = result
            .into_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::pin(stream))
    }

    async fn exists(&self, area: BlobArea, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let location = Path::from(key);
        match self.area(area).store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn list(&self, area: BlobArea, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = Path::from(prefix.trim_end_matches('/'));
        let mut keys: Vec<String> = self
            .area(area)
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, area: BlobArea, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let area_store = self.area(area);
        let start = Instant::now();
        let location = Path::from(key);

        area_store.store.delete(&location).await.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %area_store.bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Delete failed"
            );
            StorageError::DeleteFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %area_store.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Delete successful"
        );
        Ok(())
    }

    fn cdn_url(&self, key: &str) -> String {
        keys::cdn_url(&self.cdn_domain, key)
    }

    fn bucket(&self, area: BlobArea) -> &str {
        &self.area(area).bucket
    }
}
