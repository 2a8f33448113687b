//! Slidepipe Infrastructure Library
//!
//! Shared infrastructure for slidepipe binaries: telemetry initialization.

pub mod telemetry;

pub use telemetry::{init_telemetry, LogFormat};
