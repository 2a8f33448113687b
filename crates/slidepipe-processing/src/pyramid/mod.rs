//! Deep Zoom (DZI) pyramid generation
//!
//! Output layout for a base name `b` under an output directory:
//!
//! ```text
//! {output_dir}/b.dzi
//! {output_dir}/b_files/{level}/{col}_{row}.{format}
//! ```
//!
//! Level `max` holds the full-resolution image; each lower level halves the
//! previous one (rounding up) until the pyramid depth is reached.

mod layout;
mod levels;
mod manifest;
mod source;
mod tiler;
mod tiles;

pub use layout::{DziLayout, PyramidDepth, TileRect};
pub use manifest::DziManifest;
pub use tiler::{DeepZoomTiler, PyramidTiler, TiledPyramid, TilingOptions};
pub use tiles::{enumerate_tiles, level_count, TileEntry};
