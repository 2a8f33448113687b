//! Slidepipe Services Layer
//!
//! External services the pipeline calls out to. Today that is the malware
//! scanner: a [`MalwareScanner`] trait the orchestrator depends on, and a
//! ClamAV implementation speaking the clamd `INSTREAM` protocol.

pub mod services;

#[cfg(feature = "clamav")]
pub use services::ClamAVScanner;
pub use services::{MalwareScanner, ScanFailure, ScanOutcome};
