//! Shared key generation for the blob layout.
//!
//! - originals: `uploads/{job_id}/whole_slide/{filename}` and
//!   `uploads/{job_id}/cellavision/{cell_type}/{filename}`
//! - tiles: `processed/{source_base_name}/scene0_z0_c0_files/{level}/{col}_{row}.{format}`
//! - manifest: `uploads/{job_id}/full_slide_dzi/{source_base_name}/scene0_z0_c0.dzi`

use slidepipe_core::constants::PYRAMID_BASE_NAME;

use crate::traits::{StorageError, StorageResult};

/// Keep a user-supplied name to a single path segment.
pub fn segment(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

pub fn whole_slide_key(job_id: &str, filename: &str) -> String {
    format!("uploads/{}/whole_slide/{}", segment(job_id), segment(filename))
}

pub fn cell_image_key(job_id: &str, cell_type: &str, filename: &str) -> String {
    format!(
        "uploads/{}/cellavision/{}/{}",
        segment(job_id),
        segment(cell_type),
        segment(filename)
    )
}

/// Destination prefix for the tiles of a source image.
pub fn tiles_prefix(source_base_name: &str) -> String {
    format!(
        "processed/{}/{}_files",
        segment(source_base_name),
        PYRAMID_BASE_NAME
    )
}

pub fn tile_key(tiles_prefix: &str, level: u32, col: u32, row: u32, format: &str) -> String {
    format!("{}/{}/{}_{}.{}", tiles_prefix, level, col, row, format)
}

pub fn manifest_key(job_id: &str, source_base_name: &str) -> String {
    format!(
        "uploads/{}/full_slide_dzi/{}/{}.dzi",
        segment(job_id),
        segment(source_base_name),
        PYRAMID_BASE_NAME
    )
}

/// Original filename without directories or the final extension.
///
/// `slides/case 12.svs` becomes `case 12`; a name with no stem becomes `slide`.
pub fn source_base_name(original_filename: &str) -> String {
    let name = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_filename);
    let stem = match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    };
    let stem = stem.trim();
    if stem.is_empty() {
        "slide".to_string()
    } else {
        segment(stem)
    }
}

/// Public URL of a key behind the CDN. `https://` is assumed when the domain has no scheme.
pub fn cdn_url(cdn_domain: &str, key: &str) -> String {
    let domain = cdn_domain.trim().trim_end_matches('/');
    let key = key.trim_start_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        format!("{}/{}", domain, key)
    } else {
        format!("https://{}/{}", domain, key)
    }
}

/// Reject keys that could escape a backend's root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::InvalidKey(format!(
            "Storage key contains invalid path segments: {}",
            key
        )));
    }
    Ok(())
}
