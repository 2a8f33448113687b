//! Worker wiring: builds the collaborators once from configuration.

use anyhow::{Context, Result};
use slidepipe_core::Config;
use slidepipe_db::{connect_and_migrate, JobStore, PgJobRepository};
use slidepipe_processing::{DeepZoomTiler, SlideSceneAnalyzer, TilingOptions};
use slidepipe_services::{ClamAVScanner, MalwareScanner};
use slidepipe_storage::create_blob_storage;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{PipelineSettings, WorkerContext};
use crate::queue::PgJobQueue;

/// Database-backed pieces shared by every CLI command.
pub struct Persistence {
    pub pool: PgPool,
    pub job_store: Arc<PgJobRepository>,
    pub queue: Arc<PgJobQueue>,
}

pub async fn setup_persistence(config: &Config) -> Result<Persistence> {
    let pool = connect_and_migrate(config).await?;
    let job_store = Arc::new(PgJobRepository::new(pool.clone()));
    let queue = Arc::new(PgJobQueue::new(
        pool.clone(),
        config.queue_topic(),
        Duration::from_secs(config.queue_visibility_timeout_secs()),
    ));
    Ok(Persistence {
        pool,
        job_store,
        queue,
    })
}

/// Build the orchestrator's collaborators.
///
/// The scanner is only pinged; an unreachable daemon is logged and left to
/// fail individual jobs.
pub async fn build_context(config: &Config, job_store: Arc<dyn JobStore>) -> Result<WorkerContext> {
    let storage = create_blob_storage(config)
        .await
        .context("Failed to initialize blob storage")?;

    let scanner = ClamAVScanner::new(
        config.clamav_host().to_string(),
        config.clamav_port(),
        config.clamav_timeout_secs(),
    );
    match scanner.ping().await {
        Ok(()) => tracing::info!(
            host = %config.clamav_host(),
            port = config.clamav_port(),
            "ClamAV reachable"
        ),
        Err(e) => tracing::warn!(
            host = %config.clamav_host(),
            port = config.clamav_port(),
            error = %e,
            "ClamAV not reachable at start-up, scans will fail until it is"
        ),
    }

    let tiling = TilingOptions::from_config(config)?;
    tracing::info!(
        tile_size = tiling.tile_size,
        overlap = tiling.overlap,
        jpeg_quality = tiling.jpeg_quality,
        depth = ?tiling.depth,
        max_decoded_pixels = tiling.max_decoded_pixels,
        batch_size = config.tile_upload_batch_size(),
        scratch_dir = %config.scratch_dir().display(),
        "Tiling configured"
    );

    Ok(WorkerContext {
        job_store,
        storage,
        scanner: Arc::new(scanner),
        analyzer: Arc::new(SlideSceneAnalyzer),
        tiler: Arc::new(DeepZoomTiler::new(tiling)),
        settings: PipelineSettings::from_config(config),
    })
}
