use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::{ImageDescriptor, PyramidOutputs};

/// Pipeline state of a job.
///
/// `ingested → scanning → scan_clean → tiling → tiled → uploading_tiles → ready`,
/// with `scan_infected`, `scan_error`, `partially_processed` and `failed` as
/// the other terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ingested,
    Scanning,
    ScanClean,
    ScanInfected,
    ScanError,
    Tiling,
    Tiled,
    UploadingTiles,
    Ready,
    PartiallyProcessed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 11] = [
        JobStatus::Ingested,
        JobStatus::Scanning,
        JobStatus::ScanClean,
        JobStatus::ScanInfected,
        JobStatus::ScanError,
        JobStatus::Tiling,
        JobStatus::Tiled,
        JobStatus::UploadingTiles,
        JobStatus::Ready,
        JobStatus::PartiallyProcessed,
        JobStatus::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Ready
                | JobStatus::PartiallyProcessed
                | JobStatus::Failed
                | JobStatus::ScanInfected
                | JobStatus::ScanError
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::ScanInfected | JobStatus::ScanError
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            JobStatus::Ingested => "ingested",
            JobStatus::Scanning => "scanning",
            JobStatus::ScanClean => "scan_clean",
            JobStatus::ScanInfected => "scan_infected",
            JobStatus::ScanError => "scan_error",
            JobStatus::Tiling => "tiling",
            JobStatus::Tiled => "tiled",
            JobStatus::UploadingTiles => "uploading_tiles",
            JobStatus::Ready => "ready",
            JobStatus::PartiallyProcessed => "partially_processed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingested" => Ok(JobStatus::Ingested),
            "scanning" => Ok(JobStatus::Scanning),
            "scan_clean" => Ok(JobStatus::ScanClean),
            "scan_infected" => Ok(JobStatus::ScanInfected),
            "scan_error" => Ok(JobStatus::ScanError),
            "tiling" => Ok(JobStatus::Tiling),
            "tiled" => Ok(JobStatus::Tiled),
            "uploading_tiles" => Ok(JobStatus::UploadingTiles),
            "ready" => Ok(JobStatus::Ready),
            "partially_processed" => Ok(JobStatus::PartiallyProcessed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// One upload submission tracked end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub whole_slide_image: Option<ImageDescriptor>,
    #[serde(default)]
    pub cellavision_images: BTreeMap<String, Vec<ImageDescriptor>>,
    #[serde(default)]
    pub pyramid_outputs: PyramidOutputs,
    pub error_message: Option<String>,
    pub is_image_corrupted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly ingested job with no images attached.
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Ingested,
            whole_slide_image: None,
            cellavision_images: BTreeMap::new(),
            pyramid_outputs: PyramidOutputs::default(),
            error_message: None,
            is_image_corrupted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_whole_slide(mut self, image: ImageDescriptor) -> Self {
        self.whole_slide_image = Some(image);
        self
    }

    pub fn with_cell_image(mut self, cell_type: impl Into<String>, image: ImageDescriptor) -> Self {
        self.cellavision_images
            .entry(cell_type.into())
            .or_default()
            .push(image);
        self
    }

    pub fn cell_image_count(&self) -> usize {
        self.cellavision_images.values().map(Vec::len).sum()
    }
}
