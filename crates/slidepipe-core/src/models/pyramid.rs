use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Completed,
    Failed,
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid processing status: {}", s)),
        }
    }
}

/// Descriptor of one uploaded deep-zoom pyramid.
///
/// Appended to the job only after tiling and the upload of every tile succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidOutput {
    pub scene_number: u32,
    pub scene_name: String,
    pub z_level: u32,
    pub channel: u32,
    pub dzi_url: String,
    pub dzi_key: String,
    pub tiles_prefix: String,
    pub bucket: String,
    pub pyramid_levels: u32,
    pub tile_count: u64,
    pub tile_size: u32,
    pub tile_overlap: u32,
    pub tile_format: String,
    pub image_width: u32,
    pub image_height: u32,
    pub processing_status: ProcessingStatus,
    pub processing_time_ms: u64,
    pub processed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PyramidOutputs {
    #[serde(default)]
    pub whole_slide: Vec<PyramidOutput>,
}
