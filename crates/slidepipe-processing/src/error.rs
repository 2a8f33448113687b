use slidepipe_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt or unreadable image: {0}")]
    CorruptImage(String),

    #[error("Image of {width}x{height} pixels exceeds the decode budget of {limit} pixels")]
    ImageTooLarge { width: u32, height: u32, limit: u64 },

    #[error("Failed to encode tile: {0}")]
    Encode(String),

    #[error("Invalid pyramid layout: {0}")]
    InvalidLayout(String),

    #[error("No tiles found under {}", .0.display())]
    NoTiles(PathBuf),

    #[error("Failed to upload tile {key}: {source}")]
    TileUpload {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Processing task failed: {0}")]
    Task(String),
}

impl ProcessingError {
    /// True when the input image itself is at fault rather than the environment.
    pub fn is_corrupt_input(&self) -> bool {
        matches!(
            self,
            ProcessingError::UnsupportedFormat(_) | ProcessingError::CorruptImage(_)
        )
    }
}

impl From<tokio::task::JoinError> for ProcessingError {
    fn from(e: tokio::task::JoinError) -> Self {
        ProcessingError::Task(e.to_string())
    }
}
