use slidepipe_core::JobStatus;
use slidepipe_processing::ProcessingError;
use slidepipe_services::ScanFailure;
use slidepipe_storage::StorageError;
use thiserror::Error;

/// Why a job stopped early.
///
/// Each variant knows the terminal status it leaves the job in; the message
/// becomes the job's `error_message`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cell image '{filename}' ({cell_type}) is infected: {}", .signatures.join(", "))]
    CellImageInfected {
        filename: String,
        cell_type: String,
        signatures: Vec<String>,
    },

    #[error("Malware scan of cell image '{filename}' ({cell_type}) failed: {source}")]
    CellImageScanFailed {
        filename: String,
        cell_type: String,
        #[source]
        source: ScanFailure,
    },

    #[error("Whole-slide image '{filename}' is infected: {}", .signatures.join(", "))]
    WholeSlideInfected {
        filename: String,
        signatures: Vec<String>,
    },

    #[error("Malware scan of whole-slide image '{filename}' failed: {source}")]
    WholeSlideScanFailed {
        filename: String,
        #[source]
        source: ScanFailure,
    },

    #[error("Whole-slide image '{0}' has no stored blob")]
    MissingBlob(String),

    #[error("Failed to read '{key}' from storage: {source}")]
    Storage {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Whole-slide image '{filename}' could not be processed: {source}")]
    Processing {
        filename: String,
        #[source]
        source: ProcessingError,
    },

    #[error("Tile upload failed after tiling succeeded: {0}")]
    TileUpload(#[source] ProcessingError),

    #[error("Failed to publish DZI manifest '{key}': {source}")]
    ManifestUpload {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Job store update failed: {0}")]
    JobStore(String),

    #[error("Job exceeded the {0} second processing limit")]
    TimedOut(u64),
}

impl PipelineError {
    pub fn job_store(error: anyhow::Error) -> Self {
        PipelineError::JobStore(format!("{:#}", error))
    }

    /// Status the job is left in.
    ///
    /// Failures after the pyramid was cut are partial: the slide is clean and
    /// tiled but not fully published.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            PipelineError::TileUpload(_) | PipelineError::ManifestUpload { .. } => {
                JobStatus::PartiallyProcessed
            }
            _ => JobStatus::Failed,
        }
    }

    /// True when the uploaded bytes themselves are bad: malware or an undecodable image.
    pub fn marks_image_corrupted(&self) -> bool {
        match self {
            PipelineError::CellImageInfected { .. } | PipelineError::WholeSlideInfected { .. } => {
                true
            }
            PipelineError::Processing { source, .. } => source.is_corrupt_input(),
            _ => false,
        }
    }
}
