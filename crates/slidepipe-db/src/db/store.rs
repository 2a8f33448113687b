use anyhow::Result;
use async_trait::async_trait;
use slidepipe_core::models::{Job, JobStatus, PyramidOutput};

/// Durable record of ingestion jobs.
///
/// Every write is a targeted update of one field or one nested descriptor so
/// that concurrent writers never clobber each other's progress.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Insert a new job. Fails if the id is already taken.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()>;

    /// Move the job to a terminal failure status with a human-readable reason.
    ///
    /// `image_corrupted` only ever raises the flag; it is never cleared here.
    async fn record_failure(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
        image_corrupted: bool,
    ) -> Result<()>;

    /// Set the CDN URL of one stored cell image.
    ///
    /// Returns `false` without writing when the image is not stored or
    /// already carries a CDN URL.
    async fn set_cell_image_cdn_url(
        &self,
        job_id: &str,
        cell_type: &str,
        index: usize,
        cdn_url: &str,
    ) -> Result<bool>;

    /// Same as [`JobStore::set_cell_image_cdn_url`] for the whole-slide image.
    async fn set_whole_slide_cdn_url(&self, job_id: &str, cdn_url: &str) -> Result<bool>;

    /// Append a pyramid descriptor, replacing any earlier one with the same
    /// manifest key.
    async fn append_pyramid_output(&self, job_id: &str, output: &PyramidOutput) -> Result<()>;

    /// Put a finished job back to `ingested` so it can be run again.
    ///
    /// Returns `false` when the job does not exist or is still in flight.
    async fn reset_for_reprocess(&self, job_id: &str) -> Result<bool>;
}
