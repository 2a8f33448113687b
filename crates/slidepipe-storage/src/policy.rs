//! Single-put vs multipart selection for raw uploads.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Single,
    Multipart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Lengths strictly above this go multipart.
    pub multipart_threshold_bytes: u64,
    pub part_size_bytes: usize,
    /// Parts in flight at once.
    pub max_concurrency: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            multipart_threshold_bytes: 100 * 1024 * 1024,
            part_size_bytes: 10 * 1024 * 1024,
            max_concurrency: 4,
        }
    }
}

impl UploadPolicy {
    pub fn strategy_for(&self, content_length: Option<u64>) -> UploadStrategy {
        match content_length {
            Some(length) if length <= self.multipart_threshold_bytes => UploadStrategy::Single,
            _ => UploadStrategy::Multipart,
        }
    }
}
