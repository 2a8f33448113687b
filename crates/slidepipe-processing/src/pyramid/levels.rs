//! Band-by-band pyramid construction.
//!
//! Each level keeps only the rows its next row of tiles still needs, writes
//! that row of tiles as soon as it is complete and hands a 2×2 box-filtered
//! copy of its rows to the level below.

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use slidepipe_core::constants::DEFAULT_TILE_FORMAT;

use super::layout::DziLayout;
use crate::error::ProcessingError;

pub(crate) struct LevelWriter<'a> {
    layout: &'a DziLayout,
    level: u32,
    width: u32,
    height: u32,
    dir: PathBuf,
    quality: u8,
    cols: u32,
    tile_rows: u32,
    /// `rows[0]` is row `first_row` of this level.
    rows: VecDeque<Vec<u8>>,
    first_row: u32,
    received: u32,
    next_tile_row: u32,
    peak_rows: usize,
    tiles_written: u64,
    /// Upper row of a pair still waiting for its partner.
    pending: Option<Vec<u8>>,
    below: Option<Box<LevelWriter<'a>>>,
}

impl<'a> LevelWriter<'a> {
    /// Writers for `level` and every level under it down to the layout's minimum.
    pub(crate) fn new(
        layout: &'a DziLayout,
        level: u32,
        tile_root: &Path,
        quality: u8,
    ) -> Result<Self, ProcessingError> {
        let (width, height) = layout.level_dimensions(level);
        let (cols, tile_rows) = layout.tile_grid(level);
        let dir = tile_root.join(level.to_string());
        std::fs::create_dir_all(&dir)?;

        let below = if level > layout.min_level() {
            Some(Box::new(Self::new(layout, level - 1, tile_root, quality)?))
        } else {
            None
        };

        Ok(Self {
            layout,
            level,
            width,
            height,
            dir,
            quality,
            cols,
            tile_rows,
            rows: VecDeque::new(),
            first_row: 0,
            received: 0,
            next_tile_row: 0,
            peak_rows: 0,
            tiles_written: 0,
            pending: None,
            below,
        })
    }

    pub(crate) fn push_row(&mut self, row: Vec<u8>) -> Result<(), ProcessingError> {
        if row.len() != self.width as usize * 3 {
            return Err(ProcessingError::CorruptImage(format!(
                "Level {} row has {} bytes, expected {}",
                self.level,
                row.len(),
                self.width as usize * 3
            )));
        }
        if self.received == self.height {
            return Err(ProcessingError::CorruptImage(format!(
                "Level {} received more than {} rows",
                self.level, self.height
            )));
        }

        if let Some(below) = self.below.as_mut() {
            match self.pending.take() {
                None => self.pending = Some(row.clone()),
                Some(upper) => below.push_row(downsample(&upper, &row, self.width))?,
            }
        }

        self.rows.push_back(row);
        self.received += 1;
        self.peak_rows = self.peak_rows.max(self.rows.len());
        self.flush_ready()
    }

    fn flush_ready(&mut self) -> Result<(), ProcessingError> {
        while self.next_tile_row < self.tile_rows {
            let rect = self.layout.tile_rect(self.level, 0, self.next_tile_row);
            if self.received < rect.y + rect.height {
                break;
            }
            self.write_tile_row(self.next_tile_row)?;
            self.next_tile_row += 1;

            let keep_from = if self.next_tile_row < self.tile_rows {
                self.layout.tile_rect(self.level, 0, self.next_tile_row).y
            } else {
                self.received
            };
            while self.first_row < keep_from && self.rows.pop_front().is_some() {
                self.first_row += 1;
            }
        }
        Ok(())
    }

    fn write_tile_row(&mut self, tile_row: u32) -> Result<(), ProcessingError> {
        for col in 0..self.cols {
            let rect = self.layout.tile_rect(self.level, col, tile_row);
            let (start, end) = (rect.x as usize * 3, (rect.x + rect.width) as usize * 3);
            let mut pixels = Vec::with_capacity((end - start) * rect.height as usize);
            for y in rect.y..rect.y + rect.height {
                let row = &self.rows[(y - self.first_row) as usize];
                pixels.extend_from_slice(&row[start..end]);
            }
            let tile = RgbImage::from_raw(rect.width, rect.height, pixels).ok_or_else(|| {
                ProcessingError::Encode(format!(
                    "Tile {}/{}_{} has an inconsistent buffer",
                    self.level, col, tile_row
                ))
            })?;
            let path = self
                .dir
                .join(format!("{}_{}.{}", col, tile_row, DEFAULT_TILE_FORMAT));
            write_jpeg(&tile, &path, self.quality)?;
            self.tiles_written += 1;
        }
        Ok(())
    }

    /// Flush the last odd row downwards and check that every level is complete.
    ///
    /// Returns the number of tiles written by this level and the ones below it.
    pub(crate) fn finish(mut self) -> Result<u64, ProcessingError> {
        if self.received != self.height || self.next_tile_row != self.tile_rows {
            return Err(ProcessingError::CorruptImage(format!(
                "Level {} received {} of {} rows",
                self.level, self.received, self.height
            )));
        }
        tracing::debug!(
            level = self.level,
            cols = self.cols,
            rows = self.tile_rows,
            level_width = self.width,
            level_height = self.height,
            peak_buffered_rows = self.peak_rows,
            "Pyramid level written"
        );

        let mut total = self.tiles_written;
        if let Some(mut below) = self.below.take() {
            if let Some(last) = self.pending.take() {
                below.push_row(downsample(&last, &last, self.width))?;
            }
            total += (*below).finish()?;
        }
        Ok(total)
    }

    #[cfg(test)]
    fn peak_rows(&self) -> usize {
        self.peak_rows
    }
}

/// Halve two rows of `width` RGB pixels into one row of `ceil(width / 2)`.
///
/// The last column is repeated when `width` is odd.
pub(crate) fn downsample(upper: &[u8], lower: &[u8], width: u32) -> Vec<u8> {
    let width = width as usize;
    let out_width = width.div_ceil(2);
    let mut out = Vec::with_capacity(out_width * 3);
    for x in 0..out_width {
        let left = 2 * x * 3;
        let right = (2 * x + 1).min(width - 1) * 3;
        for c in 0..3 {
            let sum = u16::from(upper[left + c])
                + u16::from(upper[right + c])
                + u16::from(lower[left + c])
                + u16::from(lower[right + c]);
            out.push(((sum + 2) / 4) as u8);
        }
    }
    out
}

fn write_jpeg(tile: &RgbImage, path: &Path, quality: u8) -> Result<(), ProcessingError> {
    let file = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(file, quality);
    tile.write_with_encoder(encoder)
        .map_err(|e| ProcessingError::Encode(format!("{}: {}", path.display(), e)))
}
