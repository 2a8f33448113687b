//! Batched tile upload

mod tile_uploader;

pub use tile_uploader::{TileUploader, UploadSummary};
