use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use slidepipe_core::models::{Job, JobStatus, PyramidOutput};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::store::JobStore;

/// Process-local job store with the same update semantics as the Postgres
/// repository.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Job>>> {
        self.jobs
            .lock()
            .map_err(|_| anyhow!("in-memory job store lock poisoned"))
    }

    fn modify<T>(&self, job_id: &str, f: impl FnOnce(&mut Job) -> T) -> Result<T> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| anyhow!("Job not found: {}", job_id))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.lock()?.get(job_id).cloned())
    }

    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.lock()?;
        if jobs.contains_key(&job.job_id) {
            bail!("Job already exists: {}", job.job_id);
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.modify(job_id, |job| {
            job.status = status;
            job.updated_at = Utc::now();
        })
    }

    async fn record_failure(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
        image_corrupted: bool,
    ) -> Result<()> {
        self.modify(job_id, |job| {
            job.status = status;
            job.error_message = Some(message.to_string());
            job.is_image_corrupted |= image_corrupted;
            job.updated_at = Utc::now();
        })
    }

    async fn set_cell_image_cdn_url(
        &self,
        job_id: &str,
        cell_type: &str,
        index: usize,
        cdn_url: &str,
    ) -> Result<bool> {
        let mut jobs = self.lock()?;
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        match job
            .cellavision_images
            .get_mut(cell_type)
            .and_then(|images| images.get_mut(index))
            .and_then(|image| image.blob_storage.as_mut())
        {
            Some(location) if location.cdn_url.is_none() => {
                location.cdn_url = Some(cdn_url.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_whole_slide_cdn_url(&self, job_id: &str, cdn_url: &str) -> Result<bool> {
        let mut jobs = self.lock()?;
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        match job
            .whole_slide_image
            .as_mut()
            .and_then(|image| image.blob_storage.as_mut())
        {
            Some(location) if location.cdn_url.is_none() => {
                location.cdn_url = Some(cdn_url.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_pyramid_output(&self, job_id: &str, output: &PyramidOutput) -> Result<()> {
        self.modify(job_id, |job| {
            let outputs = &mut job.pyramid_outputs.whole_slide;
            outputs.retain(|existing| existing.dzi_key != output.dzi_key);
            outputs.push(output.clone());
            job.updated_at = Utc::now();
        })
    }

    async fn reset_for_reprocess(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.lock()?;
        match jobs.get_mut(job_id) {
            Some(job) if job.status.is_terminal() || job.status == JobStatus::Ingested => {
                job.status = JobStatus::Ingested;
                job.error_message = None;
                job.is_image_corrupted = false;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
