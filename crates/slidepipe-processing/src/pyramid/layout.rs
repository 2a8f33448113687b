use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::ProcessingError;

/// How far down the pyramid goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PyramidDepth {
    /// Down to a 1×1 level.
    #[default]
    OnePixel,
    /// Stop at the first level that fits in a single tile.
    OneTile,
}

impl FromStr for PyramidDepth {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "onepixel" => Ok(PyramidDepth::OnePixel),
            "onetile" => Ok(PyramidDepth::OneTile),
            other => Err(ProcessingError::InvalidLayout(format!(
                "Unknown pyramid depth: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Geometry of a Deep Zoom pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DziLayout {
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    depth: PyramidDepth,
}

/// `ceil(log2(n))`, with `ceil_log2(1) == 0`.
fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}

/// `ceil(value / 2^shift)`.
fn ceil_shift(value: u32, shift: u32) -> u32 {
    if shift >= 32 {
        return u32::from(value > 0);
    }
    let divisor = 1u64 << shift;
    ((u64::from(value) + divisor - 1) / divisor) as u32
}

impl DziLayout {
    pub fn new(
        width: u32,
        height: u32,
        tile_size: u32,
        overlap: u32,
        depth: PyramidDepth,
    ) -> Result<Self, ProcessingError> {
        if width == 0 || height == 0 {
            return Err(ProcessingError::InvalidLayout(format!(
                "Image has no pixels ({}x{})",
                width, height
            )));
        }
        if tile_size == 0 {
            return Err(ProcessingError::InvalidLayout(
                "Tile size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            width,
            height,
            tile_size,
            overlap,
            depth,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    /// Index of the full-resolution level.
    pub fn max_level(&self) -> u32 {
        ceil_log2(self.width.max(self.height))
    }

    pub fn min_level(&self) -> u32 {
        match self.depth {
            PyramidDepth::OnePixel => 0,
            PyramidDepth::OneTile => {
                let mut level = self.max_level();
                loop {
                    let (w, h) = self.level_dimensions(level);
                    if (w <= self.tile_size && h <= self.tile_size) || level == 0 {
                        break level;
                    }
                    level -= 1;
                }
            }
        }
    }

    pub fn levels(&self) -> RangeInclusive<u32> {
        self.min_level()..=self.max_level()
    }

    pub fn level_count(&self) -> u32 {
        self.max_level() - self.min_level() + 1
    }

    pub fn level_dimensions(&self, level: u32) -> (u32, u32) {
        let shift = self.max_level().saturating_sub(level);
        (
            ceil_shift(self.width, shift).max(1),
            ceil_shift(self.height, shift).max(1),
        )
    }

    /// Columns and rows of tiles at `level`.
    pub fn tile_grid(&self, level: u32) -> (u32, u32) {
        let (w, h) = self.level_dimensions(level);
        (w.div_ceil(self.tile_size), h.div_ceil(self.tile_size))
    }

    pub fn tile_count(&self) -> u64 {
        self.levels()
            .map(|level| {
                let (cols, rows) = self.tile_grid(level);
                u64::from(cols) * u64::from(rows)
            })
            .sum()
    }

    /// Pixel region of a tile, overlap included, clipped to the level.
    pub fn tile_rect(&self, level: u32, col: u32, row: u32) -> TileRect {
        let (level_width, level_height) = self.level_dimensions(level);
        let span = |index: u32, extent: u32| {
            let start = index * self.tile_size;
            let begin = start.saturating_sub(if index > 0 { self.overlap } else { 0 });
            let end = (start + self.tile_size + self.overlap).min(extent);
            (begin, end.saturating_sub(begin))
        };
        let (x, width) = span(col, level_width);
        let (y, height) = span(row, level_height);
        TileRect {
            x,
            y,
            width,
            height,
        }
    }
}
