use async_trait::async_trait;
use slidepipe_storage::ByteStream;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Clean,
    /// Signature names reported by the scanner.
    Infected(Vec<String>),
}

impl ScanOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanOutcome::Clean)
    }
}

/// Why a scan produced no verdict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanFailure {
    #[error("Malware scanner unreachable at {address}: {message}")]
    Unreachable { address: String, message: String },

    #[error("Malware scanner protocol error: {0}")]
    Protocol(String),

    #[error("Malware scan timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to read object while scanning: {0}")]
    SourceRead(String),

    #[error("Malware scan task failed: {0}")]
    Task(String),
}

/// Stream-based malware scanning.
#[async_trait]
pub trait MalwareScanner: Send + Sync {
    /// Scan an object without buffering it whole.
    async fn scan(&self, stream: ByteStream) -> Result<ScanOutcome, ScanFailure>;

    /// Check that the scanner answers.
    async fn ping(&self) -> Result<(), ScanFailure>;
}
