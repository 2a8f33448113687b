use crate::object::{AreaStore, ObjectBlobStore};
use crate::policy::UploadPolicy;
use crate::{BlobStorage, StorageBackend, StorageError, StorageResult};
use slidepipe_core::Config;
use std::sync::Arc;

fn upload_policy(config: &Config) -> UploadPolicy {
    UploadPolicy {
        multipart_threshold_bytes: config.upload_multipart_threshold_bytes(),
        part_size_bytes: config.upload_part_size_bytes(),
        max_concurrency: config.upload_multipart_concurrency(),
    }
}

#[cfg(feature = "storage-s3")]
fn s3_area(bucket: &str, region: &str, endpoint: Option<&str>) -> StorageResult<AreaStore> {
    use object_store::aws::AmazonS3Builder;

    // Build AmazonS3 object store from environment and explicit settings.
    let mut builder = AmazonS3Builder::from_env()
        .with_region(region)
        .with_bucket_name(bucket);

    let base_url = if let Some(endpoint) = endpoint {
        let allow_http = endpoint.starts_with("http://");
        builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        // Path-style URLs work with every S3-compatible provider.
        format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
    } else {
        format!("https://{}.s3.{}.amazonaws.com", bucket, region)
    };

    let store = builder
        .build()
        .map_err(|e| StorageError::ConfigError(e.to_string()))?;

    Ok(AreaStore::new(Arc::new(store), bucket, base_url))
}

#[cfg(feature = "storage-local")]
fn local_area(root: &std::path::Path, area: &str) -> StorageResult<AreaStore> {
    use object_store::local::LocalFileSystem;

    let path = root.join(area);
    std::fs::create_dir_all(&path).map_err(|e| {
        StorageError::ConfigError(format!(
            "Failed to create storage directory {}: {}",
            path.display(),
            e
        ))
    })?;
    let store = LocalFileSystem::new_with_prefix(&path)
        .map_err(|e| StorageError::ConfigError(e.to_string()))?;
    let base_url = format!("file://{}", path.display());

    Ok(AreaStore::new(Arc::new(store), area, base_url).without_attributes())
}

/// Create the blob storage backend selected by configuration
pub async fn create_blob_storage(config: &Config) -> StorageResult<Arc<dyn BlobStorage>> {
    let policy = upload_policy(config);

    match config.storage_backend() {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let raw_bucket = config.s3_bucket_raw().ok_or_else(|| {
                StorageError::ConfigError("S3_BUCKET_RAW not configured".to_string())
            })?;
            let processed_bucket = config.s3_bucket_processed().ok_or_else(|| {
                StorageError::ConfigError("S3_BUCKET_PROCESSED not configured".to_string())
            })?;
            let region = config.s3_region().ok_or_else(|| {
                StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
            })?;
            let endpoint = config.s3_endpoint();

            let storage = ObjectBlobStore::new(
                s3_area(raw_bucket, region, endpoint)?,
                s3_area(processed_bucket, region, endpoint)?,
                config.cdn_domain(),
                policy,
            );
            tracing::info!(
                raw_bucket = %raw_bucket,
                processed_bucket = %processed_bucket,
                region = %region,
                "Using S3 blob storage"
            );
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let root = config.local_storage_path().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;
            let root = std::path::Path::new(root);

            let storage = ObjectBlobStore::new(
                local_area(root, "raw")?,
                local_area(root, "processed")?,
                config.cdn_domain(),
                policy,
            );
            tracing::info!(path = %root.display(), "Using local filesystem blob storage");
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
