//! Whole-slide scene detection

mod analyzer;

pub(crate) use analyzer::is_tiff;
pub use analyzer::{SceneAnalyzer, SceneInfo, SlideSceneAnalyzer};
