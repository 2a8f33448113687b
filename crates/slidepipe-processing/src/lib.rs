//! Slidepipe Processing Library
//!
//! CPU- and file-bound stages of whole-slide ingestion:
//!
//! - [`slide`]: metadata-only scene detection
//! - [`pyramid`]: Deep Zoom geometry, tiling and manifest rendering
//! - [`upload`]: batched upload of a tile tree to the processed area

pub mod error;
pub mod pyramid;
pub mod slide;
pub mod upload;

pub use error::ProcessingError;
pub use pyramid::{
    DeepZoomTiler, DziLayout, DziManifest, PyramidDepth, PyramidTiler, TileEntry, TiledPyramid,
    TilingOptions,
};
pub use slide::{SceneAnalyzer, SceneInfo, SlideSceneAnalyzer};
pub use upload::{TileUploader, UploadSummary};
