//! Constants shared by the worker, the storage layer and the tiler.

/// Scene, z-level and channel that get tiled. Multi-scene slides only have scene 0 processed.
pub const TILED_SCENE_NUMBER: u32 = 0;
pub const TILED_Z_LEVEL: u32 = 0;
pub const TILED_CHANNEL: u32 = 0;

/// Base name of the generated pyramid (`scene0_z0_c0.dzi`, `scene0_z0_c0_files/`).
pub const PYRAMID_BASE_NAME: &str = "scene0_z0_c0";

/// Deep Zoom tile edge in pixels. Viewers expect this exact size.
pub const TILE_SIZE: u32 = 256;
pub const DEFAULT_TILE_OVERLAP: u32 = 0;
pub const DEFAULT_TILE_FORMAT: &str = "jpeg";
pub const DEFAULT_TILE_JPEG_QUALITY: u8 = 90;
/// `onepixel` or `onetile`.
pub const DEFAULT_TILE_DEPTH: &str = "onepixel";
/// Largest source (in pixels) decoded whole when it cannot be read in bands.
pub const DEFAULT_MAX_DECODED_PIXELS: u64 = 256 * 1024 * 1024;

pub const DZI_CONTENT_TYPE: &str = "application/xml";
pub const TILE_CONTENT_TYPE: &str = "image/jpeg";

/// Postgres NOTIFY channel used to wake idle consumers.
pub const JOB_NOTIFY_CHANNEL: &str = "slidepipe_new_job";

/// S3 rejects multipart parts smaller than this (except the last one).
pub const MIN_MULTIPART_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;
