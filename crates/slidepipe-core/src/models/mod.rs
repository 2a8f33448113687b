//! Data models for the ingestion pipeline
//!
//! A [`Job`] is one upload submission tracked end-to-end. Its images carry
//! [`BlobLocation`]s once their bytes are stored, and a successfully tiled
//! whole-slide image gains a [`PyramidOutput`].

mod blob;
mod job;
mod pyramid;

pub use blob::*;
pub use job::*;
pub use pyramid::*;
