//! Metadata-only inspection of a downloaded slide.
//!
//! TIFF-family files (TIFF, BigTIFF, SVS) are inspected by walking their IFD
//! chain without decoding pixels; each directory counts as one scene, the
//! first one providing the dimensions. Other formats are sniffed through the
//! `image` header reader and always report a single scene.

use async_trait::async_trait;
use image::ImageReader;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, Limits};

use crate::error::ProcessingError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneInfo {
    pub scene_count: u32,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

impl SceneInfo {
    pub fn is_multi_scene(&self) -> bool {
        self.scene_count > 1
    }
}

#[async_trait]
pub trait SceneAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> Result<SceneInfo, ProcessingError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlideSceneAnalyzer;

const TIFF_MAGICS: [[u8; 4]; 4] = [
    [b'I', b'I', 42, 0],
    [b'M', b'M', 0, 42],
    // BigTIFF
    [b'I', b'I', 43, 0],
    [b'M', b'M', 0, 43],
];

/// True when the file starts with a TIFF or BigTIFF header.
pub(crate) fn is_tiff(path: &Path) -> Result<bool, ProcessingError> {
    let mut header = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(TIFF_MAGICS.contains(&header)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn analyze_tiff(path: &Path) -> Result<SceneInfo, ProcessingError> {
    let reader = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(reader)
        .map_err(|e| ProcessingError::CorruptImage(e.to_string()))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| ProcessingError::CorruptImage(e.to_string()))?;

    let mut scene_count = 1u32;
    while decoder.more_images() {
        match decoder.next_image() {
            Ok(()) => scene_count += 1,
            Err(e) => {
                // Scene 0 is readable, which is all tiling needs.
                tracing::warn!(
                    path = %path.display(),
                    scenes_read = scene_count,
                    error = %e,
                    "Stopped walking TIFF directories at an unreadable entry"
                );
                break;
            }
        }
    }

    Ok(SceneInfo {
        scene_count,
        width,
        height,
        format: "tiff".to_string(),
    })
}

fn analyze_raster(path: &Path) -> Result<SceneInfo, ProcessingError> {
    let mut reader = ImageReader::open(path)?.with_guessed_format()?;
    reader.no_limits();
    let format = reader
        .format()
        .ok_or_else(|| ProcessingError::UnsupportedFormat(path.display().to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ProcessingError::CorruptImage(e.to_string()))?;

    Ok(SceneInfo {
        scene_count: 1,
        width,
        height,
        format: format!("{:?}", format).to_lowercase(),
    })
}

fn analyze_blocking(path: &Path) -> Result<SceneInfo, ProcessingError> {
    if is_tiff(path)? {
        analyze_tiff(path)
    } else {
        analyze_raster(path)
    }
}

#[async_trait]
impl SceneAnalyzer for SlideSceneAnalyzer {
    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    async fn analyze(&self, path: &Path) -> Result<SceneInfo, ProcessingError> {
        let owned: PathBuf = path.to_path_buf();
        let info = tokio::task::spawn_blocking(move || analyze_blocking(&owned)).await??;

        tracing::info!(
            scene_count = info.scene_count,
            is_multi_scene = info.is_multi_scene(),
            width = info.width,
            height = info.height,
            format = %info.format,
            "Scene analysis complete"
        );
        Ok(info)
    }
}
