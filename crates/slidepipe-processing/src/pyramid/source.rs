//! Row readers for scene 0 of a slide.
//!
//! 8-bit chunky TIFFs (stripped or tiled, including SVS) are read one strip
//! or one row of tiles at a time, so memory follows the slide width rather
//! than its area. Everything else is decoded whole by `image`, bounded by a
//! pixel budget.

use image::{ImageReader, RgbImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{ChunkType, Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};

use crate::error::ProcessingError;
use crate::slide::is_tiff;

/// Receives one packed RGB8 row.
pub(crate) type RowSink<'a> = dyn FnMut(Vec<u8>) -> Result<(), ProcessingError> + 'a;

pub(crate) trait RowSource {
    fn dimensions(&self) -> (u32, u32);

    /// Feed every row top to bottom.
    fn read_rows(&mut self, sink: &mut RowSink<'_>) -> Result<(), ProcessingError>;
}

/// Open scene 0 of `path` for row-by-row reading.
pub(crate) fn open_source(
    path: &Path,
    max_decoded_pixels: u64,
) -> Result<Box<dyn RowSource>, ProcessingError> {
    if is_tiff(path)? {
        if let Some(rows) = TiffRows::open(path, max_decoded_pixels)? {
            return Ok(Box::new(rows));
        }
        tracing::debug!(
            path = %path.display(),
            "TIFF sample layout cannot be streamed, decoding whole image"
        );
    }
    Ok(Box::new(DecodedRows::open(path, max_decoded_pixels)?))
}

fn tiff_error(error: TiffError) -> ProcessingError {
    match error {
        TiffError::IoError(e) => ProcessingError::Io(e),
        TiffError::UnsupportedError(e) => ProcessingError::UnsupportedFormat(e.to_string()),
        other => ProcessingError::CorruptImage(other.to_string()),
    }
}

fn check_budget(width: u32, height: u32, limit: u64) -> Result<(), ProcessingError> {
    if u64::from(width) * u64::from(height) > limit {
        return Err(ProcessingError::ImageTooLarge {
            width,
            height,
            limit,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channels {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl Channels {
    fn samples(self) -> usize {
        match self {
            Channels::Gray => 1,
            Channels::GrayAlpha => 2,
            Channels::Rgb => 3,
            Channels::Rgba => 4,
        }
    }

    /// Expand one row of samples to RGB8, dropping alpha.
    fn to_rgb(self, samples: &[u8]) -> Vec<u8> {
        match self {
            Channels::Rgb => samples.to_vec(),
            Channels::Rgba => samples
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            Channels::Gray => samples.iter().flat_map(|&g| [g, g, g]).collect(),
            Channels::GrayAlpha => samples
                .chunks_exact(2)
                .flat_map(|px| [px[0], px[0], px[0]])
                .collect(),
        }
    }
}

const COMPRESSION_JPEG: u16 = 7;
const PLANAR_SEPARATE: u16 = 2;

struct TiffRows {
    decoder: Decoder<BufReader<File>>,
    width: u32,
    height: u32,
    channels: Channels,
}

impl TiffRows {
    /// `None` when the first directory uses a layout this reader does not stream.
    fn open(path: &Path, max_decoded_pixels: u64) -> Result<Option<Self>, ProcessingError> {
        let reader = BufReader::new(File::open(path)?);
        let mut decoder = Decoder::new(reader)
            .map_err(tiff_error)?
            .with_limits(Limits::unlimited());
        let (width, height) = decoder.dimensions().map_err(tiff_error)?;

        let compression = decoder
            .find_tag_unsigned::<u16>(Tag::Compression)
            .map_err(tiff_error)?;
        let planar = decoder
            .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
            .map_err(tiff_error)?;
        if planar == Some(PLANAR_SEPARATE) {
            return Ok(None);
        }

        let channels = match decoder.colortype() {
            Ok(ColorType::Gray(8)) => Channels::Gray,
            Ok(ColorType::GrayA(8)) => Channels::GrayAlpha,
            Ok(ColorType::RGB(8)) => Channels::Rgb,
            Ok(ColorType::RGBA(8)) => Channels::Rgba,
            // The JPEG codec converts YCbCr to RGB while decoding.
            Ok(ColorType::YCbCr(8)) if compression == Some(COMPRESSION_JPEG) => Channels::Rgb,
            Ok(_) | Err(TiffError::UnsupportedError(_)) => return Ok(None),
            Err(e) => return Err(tiff_error(e)),
        };

        // One strip or one row of tiles is held at a time.
        let (_, chunk_height) = decoder.chunk_dimensions();
        check_budget(width, chunk_height.min(height), max_decoded_pixels)?;

        Ok(Some(Self {
            decoder,
            width,
            height,
            channels,
        }))
    }

    fn read_chunk(&mut self, index: u32) -> Result<Vec<u8>, ProcessingError> {
        match self.decoder.read_chunk(index).map_err(tiff_error)? {
            DecodingResult::U8(data) => Ok(data),
            _ => Err(ProcessingError::UnsupportedFormat(
                "TIFF samples are not 8-bit".to_string(),
            )),
        }
    }

    fn read_strips(&mut self, sink: &mut RowSink<'_>) -> Result<(), ProcessingError> {
        let strips = self.decoder.strip_count().map_err(tiff_error)?;
        let samples = self.channels.samples();
        let mut emitted = 0u32;
        for index in 0..strips {
            let (strip_width, strip_rows) = self.decoder.chunk_data_dimensions(index);
            let data = self.read_chunk(index)?;
            let row_len = strip_width as usize * samples;
            for row in data.chunks_exact(row_len).take(strip_rows as usize) {
                if emitted == self.height {
                    break;
                }
                sink(self.channels.to_rgb(row))?;
                emitted += 1;
            }
        }
        self.expect_rows(emitted)
    }

    fn read_tiles(&mut self, sink: &mut RowSink<'_>) -> Result<(), ProcessingError> {
        let (tile_width, tile_height) = self.decoder.chunk_dimensions();
        let across = self.width.div_ceil(tile_width);
        let down = self.height.div_ceil(tile_height);
        let samples = self.channels.samples();
        let row_bytes = self.width as usize * 3;
        let mut emitted = 0u32;

        for tile_row in 0..down {
            let band_rows = tile_height.min(self.height - tile_row * tile_height) as usize;
            let mut band = vec![vec![0u8; row_bytes]; band_rows];
            for tile_col in 0..across {
                let index = tile_row * across + tile_col;
                let (data_width, data_height) = self.decoder.chunk_data_dimensions(index);
                let data = self.read_chunk(index)?;
                let x0 = (tile_col * tile_width) as usize * 3;
                let rows = data
                    .chunks_exact(data_width as usize * samples)
                    .take((data_height as usize).min(band_rows));
                for (target, source) in band.iter_mut().zip(rows) {
                    let rgb = self.channels.to_rgb(source);
                    let end = (x0 + rgb.len()).min(row_bytes);
                    target[x0..end].copy_from_slice(&rgb[..end - x0]);
                }
            }
            for row in band {
                sink(row)?;
                emitted += 1;
            }
        }
        self.expect_rows(emitted)
    }

    fn expect_rows(&self, emitted: u32) -> Result<(), ProcessingError> {
        if emitted != self.height {
            return Err(ProcessingError::CorruptImage(format!(
                "TIFF holds {} of {} rows",
                emitted, self.height
            )));
        }
        Ok(())
    }
}

impl RowSource for TiffRows {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_rows(&mut self, sink: &mut RowSink<'_>) -> Result<(), ProcessingError> {
        match self.decoder.get_chunk_type() {
            ChunkType::Strip => self.read_strips(sink),
            ChunkType::Tile => self.read_tiles(sink),
        }
    }
}

/// Whole-image fallback for formats without random access.
struct DecodedRows {
    image: RgbImage,
}

impl DecodedRows {
    fn open(path: &Path, max_decoded_pixels: u64) -> Result<Self, ProcessingError> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        if reader.format().is_none() {
            return Err(ProcessingError::UnsupportedFormat(
                path.display().to_string(),
            ));
        }
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ProcessingError::CorruptImage(e.to_string()))?;
        check_budget(width, height, max_decoded_pixels)?;

        let mut reader = ImageReader::open(path)?.with_guessed_format()?;
        // The budget above is the limit; the decoder's own defaults are too small for slides.
        reader.no_limits();
        let image = reader
            .decode()
            .map_err(|e| ProcessingError::CorruptImage(e.to_string()))?
            .into_rgb8();
        Ok(Self { image })
    }
}

impl RowSource for DecodedRows {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn read_rows(&mut self, sink: &mut RowSink<'_>) -> Result<(), ProcessingError> {
        let row_len = self.image.width() as usize * 3;
        for row in self.image.as_raw().chunks_exact(row_len) {
            sink(row.to_vec())?;
        }
        Ok(())
    }
}
