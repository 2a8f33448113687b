//! Collaborators of the job orchestrator.
//!
//! Built once at start-up and shared by every job the worker runs. Each
//! collaborator sits behind a trait so tests can swap in doubles.

use slidepipe_core::Config;
use slidepipe_db::JobStore;
use slidepipe_processing::{PyramidTiler, SceneAnalyzer};
use slidepipe_services::MalwareScanner;
use slidepipe_storage::BlobStorage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of the per-job `{job_id}-{random}` scratch directories.
    pub scratch_dir: PathBuf,
    /// Upper bound on one job's whole run.
    pub job_timeout: Duration,
    pub tile_upload_batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            job_timeout: Duration::from_secs(14_400),
            tile_upload_batch_size: 50,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scratch_dir: config.scratch_dir().clone(),
            job_timeout: Duration::from_secs(config.job_timeout_secs()),
            tile_upload_batch_size: config.tile_upload_batch_size(),
        }
    }
}

#[derive(Clone)]
pub struct WorkerContext {
    pub job_store: Arc<dyn JobStore>,
    pub storage: Arc<dyn BlobStorage>,
    pub scanner: Arc<dyn MalwareScanner>,
    pub analyzer: Arc<dyn SceneAnalyzer>,
    pub tiler: Arc<dyn PyramidTiler>,
    pub settings: PipelineSettings,
}
