use async_trait::async_trait;
use slidepipe_core::constants::{
    DEFAULT_MAX_DECODED_PIXELS, DEFAULT_TILE_FORMAT, DEFAULT_TILE_JPEG_QUALITY,
    DEFAULT_TILE_OVERLAP, TILE_SIZE,
};
use slidepipe_core::Config;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::layout::{DziLayout, PyramidDepth};
use super::levels::LevelWriter;
use super::manifest::DziManifest;
use super::source::open_source;
use crate::error::ProcessingError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingOptions {
    pub tile_size: u32,
    pub overlap: u32,
    pub jpeg_quality: u8,
    pub depth: PyramidDepth,
    /// Sources that must be decoded whole are refused above this many pixels.
    pub max_decoded_pixels: u64,
}

impl Default for TilingOptions {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            overlap: DEFAULT_TILE_OVERLAP,
            jpeg_quality: DEFAULT_TILE_JPEG_QUALITY,
            depth: PyramidDepth::OnePixel,
            max_decoded_pixels: DEFAULT_MAX_DECODED_PIXELS,
        }
    }
}

impl TilingOptions {
    pub fn from_config(config: &Config) -> Result<Self, ProcessingError> {
        Ok(Self {
            jpeg_quality: config.tile_jpeg_quality(),
            depth: config.tile_depth().parse()?,
            max_decoded_pixels: config.tile_max_decoded_pixels(),
            ..Self::default()
        })
    }
}

/// A pyramid written to local scratch, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledPyramid {
    pub manifest_path: PathBuf,
    /// The `{base}_files` directory holding one sub-directory per level.
    pub tile_root: PathBuf,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub tile_count: u64,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
}

#[async_trait]
pub trait PyramidTiler: Send + Sync {
    /// Cut `source` into a Deep Zoom pyramid named `base_name` inside `output_dir`.
    async fn tile(
        &self,
        source: &Path,
        output_dir: &Path,
        base_name: &str,
    ) -> Result<TiledPyramid, ProcessingError>;
}

/// Streams scene 0 through every pyramid level at once on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct DeepZoomTiler {
    options: TilingOptions,
}

impl DeepZoomTiler {
    pub fn new(options: TilingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TilingOptions {
        &self.options
    }
}

fn tile_blocking(
    source: &Path,
    output_dir: &Path,
    base_name: &str,
    options: &TilingOptions,
) -> Result<TiledPyramid, ProcessingError> {
    let start = Instant::now();
    let mut rows = open_source(source, options.max_decoded_pixels)?;
    let (width, height) = rows.dimensions();
    let layout = DziLayout::new(
        width,
        height,
        options.tile_size,
        options.overlap,
        options.depth,
    )?;

    let tile_root = output_dir.join(format!("{}_files", base_name));
    std::fs::create_dir_all(&tile_root)?;

    let mut top = LevelWriter::new(&layout, layout.max_level(), &tile_root, options.jpeg_quality)?;
    rows.read_rows(&mut |row| top.push_row(row))?;
    let tile_count = top.finish()?;

    let manifest_path = output_dir.join(format!("{}.dzi", base_name));
    std::fs::write(
        &manifest_path,
        DziManifest::from_layout(&layout, DEFAULT_TILE_FORMAT).to_xml(),
    )?;

    tracing::info!(
        width,
        height,
        levels = layout.level_count(),
        tile_count,
        duration_ms = start.elapsed().as_millis() as u64,
        "Deep zoom pyramid generated"
    );

    Ok(TiledPyramid {
        manifest_path,
        tile_root,
        width,
        height,
        levels: layout.level_count(),
        tile_count,
        tile_size: options.tile_size,
        overlap: options.overlap,
        format: DEFAULT_TILE_FORMAT.to_string(),
    })
}

#[async_trait]
impl PyramidTiler for DeepZoomTiler {
    #[tracing::instrument(skip(self), fields(source = %source.display()))]
    async fn tile(
        &self,
        source: &Path,
        output_dir: &Path,
        base_name: &str,
    ) -> Result<TiledPyramid, ProcessingError> {
        let source = source.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let base_name = base_name.to_string();
        let options = self.options.clone();

        tokio::task::spawn_blocking(move || {
            tile_blocking(&source, &output_dir, &base_name, &options)
        })
        .await?
    }
}
