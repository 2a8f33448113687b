#[cfg(feature = "clamav")]
pub mod clamav;
pub mod scanner;

#[cfg(feature = "clamav")]
pub use clamav::ClamAVScanner;
pub use scanner::{MalwareScanner, ScanFailure, ScanOutcome};
