use bytes::Bytes;
use futures::future::try_join_all;
use slidepipe_core::constants::{DEFAULT_TILE_FORMAT, TILE_CONTENT_TYPE};
use slidepipe_storage::{keys, BlobStorage};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::error::ProcessingError;
use crate::pyramid::{enumerate_tiles, level_count, TileEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded_count: u64,
    pub level_count: u32,
    pub elapsed_ms: u64,
}

/// Uploads a tile tree in fixed-size batches.
///
/// Tiles within a batch upload concurrently; batches run one after another.
/// The first failed tile aborts the whole upload.
pub struct TileUploader {
    storage: Arc<dyn BlobStorage>,
    batch_size: usize,
}

impl TileUploader {
    pub fn new(storage: Arc<dyn BlobStorage>, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
        }
    }

    async fn upload_tile(
        &self,
        tile: &TileEntry,
        destination_prefix: &str,
    ) -> Result<(), ProcessingError> {
        let data = tokio::fs::read(&tile.path).await?;
        let key = keys::tile_key(
            destination_prefix,
            tile.level,
            tile.col,
            tile.row,
            DEFAULT_TILE_FORMAT,
        );
        self.storage
            .upload_processed(&key, TILE_CONTENT_TYPE, Bytes::from(data))
            .await
            .map_err(|source| ProcessingError::TileUpload { key, source })?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(tile_root = %tile_root.display()))]
    pub async fn upload_all(
        &self,
        tile_root: &Path,
        destination_prefix: &str,
    ) -> Result<UploadSummary, ProcessingError> {
        let start = Instant::now();
        let tiles = enumerate_tiles(tile_root, DEFAULT_TILE_FORMAT).await?;
        if tiles.is_empty() {
            return Err(ProcessingError::NoTiles(tile_root.to_path_buf()));
        }

        let total = tiles.len();
        let levels = level_count(&tiles);
        let batch_count = total.div_ceil(self.batch_size);
        tracing::info!(
            total_tiles = total,
            levels,
            batch_size = self.batch_size,
            batch_count,
            "Starting tile upload"
        );

        let mut uploaded = 0usize;
        for (index, batch) in tiles.chunks(self.batch_size).enumerate() {
            let uploads = batch
                .iter()
                .map(|tile| self.upload_tile(tile, destination_prefix));
            if let Err(e) = try_join_all(uploads).await {
                tracing::error!(
                    batch = index + 1,
                    batch_count,
                    uploaded,
                    total_tiles = total,
                    error = %e,
                    "Tile upload batch failed"
                );
                return Err(e);
            }

            uploaded += batch.len();
            let elapsed = start.elapsed();
            let rate = uploaded as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            tracing::info!(
                batch = index + 1,
                batch_count,
                uploaded,
                total_tiles = total,
                percent = format_args!("{:.1}", uploaded as f64 * 100.0 / total as f64),
                tiles_per_sec = format_args!("{:.1}", rate),
                elapsed_ms = elapsed.as_millis() as u64,
                "Tile upload progress"
            );
        }

        Ok(UploadSummary {
            uploaded_count: uploaded as u64,
            level_count: levels,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidepipe_core::BlobArea;
    use slidepipe_storage::ObjectBlobStore;
    use tempfile::tempdir;

    fn write_tiles(root: &Path, layout: &[(u32, u32, u32)]) {
        for &(level, cols, rows) in layout {
            let dir = root.join(level.to_string());
            std::fs::create_dir_all(&dir).unwrap();
            for col in 0..cols {
                for row in 0..rows {
                    std::fs::write(dir.join(format!("{}_{}.jpeg", col, row)), b"tile").unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn uploads_every_tile_under_prefix() {
        let dir = tempdir().unwrap();
        write_tiles(dir.path(), &[(0, 1, 1), (1, 2, 1), (2, 3, 2)]);
        let storage = Arc::new(ObjectBlobStore::in_memory("cdn.example.com"));

        let summary = TileUploader::new(storage.clone(), 4)
            .upload_all(dir.path(), "processed/case/scene0_z0_c0_files")
            .await
            .unwrap();

        assert_eq!(summary.uploaded_count, 9);
        assert_eq!(summary.level_count, 3);

        let keys = storage
            .list(BlobArea::Processed, "processed/case/scene0_z0_c0_files")
            .await
            .unwrap();
        assert_eq!(keys.len(), 9);
        assert!(keys.contains(&"processed/case/scene0_z0_c0_files/2/2_1.jpeg".to_string()));
    }

    #[tokio::test]
    async fn empty_tree_is_an_error() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(ObjectBlobStore::in_memory("cdn.example.com"));

        let err = TileUploader::new(storage, 50)
            .upload_all(dir.path(), "processed/x/scene0_z0_c0_files")
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessingError::NoTiles(_)));
    }
}
