//! Enumeration of a tile tree written by the tiler.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::ProcessingError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEntry {
    pub level: u32,
    pub col: u32,
    pub row: u32,
    pub path: PathBuf,
}

/// Parse `{col}_{row}.{extension}`.
fn parse_tile_name(name: &str, extension: &str) -> Option<(u32, u32)> {
    let stem = name.strip_suffix(extension)?.strip_suffix('.')?;
    let (col, row) = stem.split_once('_')?;
    Some((col.parse().ok()?, row.parse().ok()?))
}

/// Every tile under `tile_root`, ordered by level, then column, then row.
///
/// Only directories named by an integer count as levels and only files named
/// `{col}_{row}.{extension}` count as tiles; anything else (properties files,
/// stray metadata) is skipped.
pub async fn enumerate_tiles(
    tile_root: &Path,
    extension: &str,
) -> Result<Vec<TileEntry>, ProcessingError> {
    let mut tiles = Vec::new();
    let mut levels = tokio::fs::read_dir(tile_root).await?;

    while let Some(level_entry) = levels.next_entry().await? {
        if !level_entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(level) = level_entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        let mut files = tokio::fs::read_dir(level_entry.path()).await?;
        while let Some(file_entry) = files.next_entry().await? {
            if !file_entry.file_type().await?.is_file() {
                continue;
            }
            let name = file_entry.file_name();
            let Some((col, row)) = name.to_str().and_then(|n| parse_tile_name(n, extension))
            else {
                continue;
            };
            tiles.push(TileEntry {
                level,
                col,
                row,
                path: file_entry.path(),
            });
        }
    }

    tiles.sort_by_key(|tile| (tile.level, tile.col, tile.row));
    Ok(tiles)
}

/// Number of distinct levels that hold at least one tile.
pub fn level_count(tiles: &[TileEntry]) -> u32 {
    tiles
        .iter()
        .map(|tile| tile.level)
        .collect::<BTreeSet<_>>()
        .len() as u32
}
