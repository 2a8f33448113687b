//! Job state machine.
//!
//! `ingested → scanning → scan_clean → tiling → tiled → uploading_tiles → ready`.
//! Every transition is written to the job store before the next stage starts.
//! Errors never escape [`JobOrchestrator::handle`]: they become a terminal
//! status and an `error_message` on the job.

use bytes::Bytes;
use chrono::Utc;
use slidepipe_core::constants::{
    DZI_CONTENT_TYPE, PYRAMID_BASE_NAME, TILED_CHANNEL, TILED_SCENE_NUMBER, TILED_Z_LEVEL,
};
use slidepipe_core::{BlobArea, ImageDescriptor, Job, JobStatus, ProcessingStatus, PyramidOutput};
use slidepipe_processing::TileUploader;
use slidepipe_services::{ScanFailure, ScanOutcome};
use slidepipe_storage::keys;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::context::WorkerContext;
use crate::error::PipelineError;

/// What happened to one delivered job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// No job with that id; nothing was written.
    Missing,
    /// The job had already reached a terminal status.
    AlreadyFinished(JobStatus),
    /// The job ran and ended in this status.
    Finished(JobStatus),
}

pub struct JobOrchestrator {
    ctx: WorkerContext,
}

impl JobOrchestrator {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Run one job to a terminal status.
    ///
    /// Only a job store that cannot be read or cannot take the final status
    /// makes this return an error; the message should then be redelivered.
    #[tracing::instrument(skip(self))]
    pub async fn handle(&self, job_id: &str) -> anyhow::Result<JobOutcome> {
        let Some(job) = self.ctx.job_store.get_job(job_id).await? else {
            tracing::info!("Job not found, dropping message");
            return Ok(JobOutcome::Missing);
        };

        if job.status.is_terminal() {
            tracing::info!(status = %job.status, "Job already finished, skipping duplicate delivery");
            return Ok(JobOutcome::AlreadyFinished(job.status));
        }
        if job.status != JobStatus::Ingested {
            tracing::warn!(status = %job.status, "Restarting job interrupted mid-run");
        }

        let start = Instant::now();
        let timeout = self.ctx.settings.job_timeout;
        let result = match tokio::time::timeout(timeout, self.run_pipeline(&job)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TimedOut(timeout.as_secs())),
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Job completed"
                );
                Ok(JobOutcome::Finished(JobStatus::Ready))
            }
            Err(e) => {
                let status = e.terminal_status();
                tracing::error!(
                    status = %status,
                    error = %e,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Job failed"
                );
                self.ctx
                    .job_store
                    .record_failure(job_id, status, &e.to_string(), e.marks_image_corrupted())
                    .await?;
                Ok(JobOutcome::Finished(status))
            }
        }
    }

    /// Give up on a job whose message keeps coming back.
    #[tracing::instrument(skip(self))]
    pub async fn abandon(&self, job_id: &str, max_deliveries: u32) -> anyhow::Result<JobOutcome> {
        let Some(job) = self.ctx.job_store.get_job(job_id).await? else {
            return Ok(JobOutcome::Missing);
        };
        if job.status.is_terminal() {
            return Ok(JobOutcome::AlreadyFinished(job.status));
        }

        let message = format!("Job exceeded {} delivery attempts", max_deliveries);
        tracing::error!(status = %job.status, max_deliveries, "Abandoning job");
        self.ctx
            .job_store
            .record_failure(job_id, JobStatus::Failed, &message, false)
            .await?;
        Ok(JobOutcome::Finished(JobStatus::Failed))
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<(), PipelineError> {
        self.ctx
            .job_store
            .update_status(job_id, status)
            .await
            .map_err(PipelineError::job_store)?;
        tracing::info!(job_id = %job_id, status = %status, "Job status updated");
        Ok(())
    }

    async fn run_pipeline(&self, job: &Job) -> Result<(), PipelineError> {
        let job_id = job.job_id.as_str();

        self.set_status(job_id, JobStatus::Scanning).await?;
        self.scan_cell_images(job).await?;
        self.backfill_cell_cdn_urls(job).await?;
        if let Some(image) = &job.whole_slide_image {
            self.scan_whole_slide(job_id, image).await?;
        }
        self.set_status(job_id, JobStatus::ScanClean).await?;

        if let Some(image) = &job.whole_slide_image {
            self.process_whole_slide(job_id, image).await?;
        } else {
            tracing::info!(job_id = %job_id, "No whole-slide image, skipping tiling");
        }

        self.set_status(job_id, JobStatus::Ready).await
    }

    /// Stream a raw object through the scanner.
    ///
    /// The outer error is a storage failure; the inner result is the scanner's verdict.
    async fn scan_key(
        &self,
        key: &str,
    ) -> Result<Result<ScanOutcome, ScanFailure>, PipelineError> {
        let start = Instant::now();
        let stream = self
            .ctx
            .storage
            .get_stream(BlobArea::Raw, key)
            .await
            .map_err(|source| PipelineError::Storage {
                key: key.to_string(),
                source,
            })?;
        let verdict = self.ctx.scanner.scan(stream).await;
        tracing::info!(
            key = %key,
            clean = matches!(verdict, Ok(ScanOutcome::Clean)),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Malware scan finished"
        );
        Ok(verdict)
    }

    /// Scan stored cell images in order, stopping at the first bad one.
    async fn scan_cell_images(&self, job: &Job) -> Result<(), PipelineError> {
        for (cell_type, images) in &job.cellavision_images {
            for image in images {
                let Some(location) = &image.blob_storage else {
                    continue;
                };
                match self.scan_key(&location.key).await? {
                    Ok(ScanOutcome::Clean) => {}
                    Ok(ScanOutcome::Infected(signatures)) => {
                        return Err(PipelineError::CellImageInfected {
                            filename: image.original_filename.clone(),
                            cell_type: cell_type.clone(),
                            signatures,
                        });
                    }
                    Err(source) => {
                        return Err(PipelineError::CellImageScanFailed {
                            filename: image.original_filename.clone(),
                            cell_type: cell_type.clone(),
                            source,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn backfill_cell_cdn_urls(&self, job: &Job) -> Result<(), PipelineError> {
        let mut updated = 0usize;
        for (cell_type, images) in &job.cellavision_images {
            for (index, image) in images.iter().enumerate() {
                let Some(location) = image.blob_storage.as_ref().filter(|_| image.needs_cdn_url())
                else {
                    continue;
                };
                let url = self.ctx.storage.cdn_url(&location.key);
                if self
                    .ctx
                    .job_store
                    .set_cell_image_cdn_url(&job.job_id, cell_type, index, &url)
                    .await
                    .map_err(PipelineError::job_store)?
                {
                    updated += 1;
                }
            }
        }
        if updated > 0 {
            tracing::info!(job_id = %job.job_id, updated, "Backfilled cell image CDN URLs");
        }
        Ok(())
    }

    async fn scan_whole_slide(
        &self,
        job_id: &str,
        image: &ImageDescriptor,
    ) -> Result<(), PipelineError> {
        let location = image
            .blob_storage
            .as_ref()
            .ok_or_else(|| PipelineError::MissingBlob(image.original_filename.clone()))?;
        match self.scan_key(&location.key).await? {
            Ok(ScanOutcome::Clean) => Ok(()),
            Ok(ScanOutcome::Infected(signatures)) => Err(PipelineError::WholeSlideInfected {
                filename: image.original_filename.clone(),
                signatures,
            }),
            Err(source) => {
                tracing::warn!(job_id = %job_id, error = %source, "Whole-slide scan failed");
                Err(PipelineError::WholeSlideScanFailed {
                    filename: image.original_filename.clone(),
                    source,
                })
            }
        }
    }

    /// Download, tile and publish the whole-slide image.
    ///
    /// The scratch directory is removed whatever the outcome.
    async fn process_whole_slide(
        &self,
        job_id: &str,
        image: &ImageDescriptor,
    ) -> Result<(), PipelineError> {
        let scratch_root = &self.ctx.settings.scratch_dir;
        tokio::fs::create_dir_all(scratch_root)
            .await
            .map_err(PipelineError::Scratch)?;
        let scratch = tempfile::Builder::new()
            .prefix(&scratch_prefix(job_id))
            .tempdir_in(scratch_root)
            .map_err(PipelineError::Scratch)?;
        tracing::debug!(job_id = %job_id, path = %scratch.path().display(), "Created scratch directory");

        let result = self.tile_and_publish(job_id, image, scratch.path()).await;

        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
        }
        result
    }

    async fn tile_and_publish(
        &self,
        job_id: &str,
        image: &ImageDescriptor,
        scratch: &Path,
    ) -> Result<(), PipelineError> {
        let start = Instant::now();
        let filename = image.original_filename.clone();
        let location = image
            .blob_storage
            .as_ref()
            .ok_or_else(|| PipelineError::MissingBlob(filename.clone()))?;
        let processing = |source| PipelineError::Processing {
            filename: filename.clone(),
            source,
        };

        let source_path = scratch.join(source_file_name(&filename));
        self.ctx
            .storage
            .download_to_file(BlobArea::Raw, &location.key, &source_path)
            .await
            .map_err(|source| PipelineError::Storage {
                key: location.key.clone(),
                source,
            })?;

        let scene = self
            .ctx
            .analyzer
            .analyze(&source_path)
            .await
            .map_err(processing)?;
        if scene.is_multi_scene() {
            tracing::warn!(
                job_id = %job_id,
                scene_count = scene.scene_count,
                "Multi-scene slide, only scene 0 is tiled"
            );
        }
        tracing::info!(
            job_id = %job_id,
            scene_count = scene.scene_count,
            width = scene.width,
            height = scene.height,
            format = %scene.format,
            "Analyzed whole-slide image"
        );

        self.set_status(job_id, JobStatus::Tiling).await?;
        let pyramid = self
            .ctx
            .tiler
            .tile(&source_path, &scratch.join("pyramid"), PYRAMID_BASE_NAME)
            .await
            .map_err(processing)?;
        self.set_status(job_id, JobStatus::Tiled).await?;

        self.set_status(job_id, JobStatus::UploadingTiles).await?;
        let base_name = keys::source_base_name(&filename);
        let tiles_prefix = keys::tiles_prefix(&base_name);
        let summary = TileUploader::new(
            self.ctx.storage.clone(),
            self.ctx.settings.tile_upload_batch_size,
        )
        .upload_all(&pyramid.tile_root, &tiles_prefix)
        .await
        .map_err(PipelineError::TileUpload)?;

        let manifest_key = keys::manifest_key(job_id, &base_name);
        let manifest = tokio::fs::read(&pyramid.manifest_path)
            .await
            .map_err(|e| PipelineError::TileUpload(e.into()))?;
        let receipt = self
            .ctx
            .storage
            .upload_processed(&manifest_key, DZI_CONTENT_TYPE, Bytes::from(manifest))
            .await
            .map_err(|source| PipelineError::ManifestUpload {
                key: manifest_key.clone(),
                source,
            })?;

        let output = PyramidOutput {
            scene_number: TILED_SCENE_NUMBER,
            scene_name: format!("scene{}", TILED_SCENE_NUMBER),
            z_level: TILED_Z_LEVEL,
            channel: TILED_CHANNEL,
            dzi_url: self.ctx.storage.cdn_url(&manifest_key),
            dzi_key: manifest_key,
            tiles_prefix,
            bucket: receipt.bucket,
            pyramid_levels: pyramid.levels,
            tile_count: summary.uploaded_count,
            tile_size: pyramid.tile_size,
            tile_overlap: pyramid.overlap,
            tile_format: pyramid.format.clone(),
            image_width: pyramid.width,
            image_height: pyramid.height,
            processing_status: ProcessingStatus::Completed,
            processing_time_ms: start.elapsed().as_millis() as u64,
            processed_at: Utc::now(),
            error_message: None,
        };
        self.ctx
            .job_store
            .append_pyramid_output(job_id, &output)
            .await
            .map_err(PipelineError::job_store)?;
        tracing::info!(
            job_id = %job_id,
            dzi_key = %output.dzi_key,
            tile_count = output.tile_count,
            levels = output.pyramid_levels,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Pyramid published"
        );

        if image.needs_cdn_url() {
            let url = self.ctx.storage.cdn_url(&location.key);
            self.ctx
                .job_store
                .set_whole_slide_cdn_url(job_id, &url)
                .await
                .map_err(PipelineError::job_store)?;
        }
        Ok(())
    }
}

/// Scratch directory name prefix; job ids may contain separators.
fn scratch_prefix(job_id: &str) -> String {
    format!("{}-", keys::segment(job_id))
}

/// Local name for the downloaded original, keeping its extension for format sniffing.
fn source_file_name(original_filename: &str) -> PathBuf {
    match Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some(ext) if !ext.is_empty() => PathBuf::from(format!("source.{}", ext)),
        _ => PathBuf::from("source"),
    }
}
