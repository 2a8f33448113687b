use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use slidepipe_core::models::{ImageDescriptor, Job, JobStatus, PyramidOutput, PyramidOutputs};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres};
use std::collections::BTreeMap;

use super::store::JobStore;

const JOB_COLUMNS: &str = "job_id, status, whole_slide_image, cellavision_images, \
     pyramid_outputs, error_message, is_image_corrupted, created_at, updated_at";

#[derive(FromRow)]
struct JobRow {
    job_id: String,
    status: String,
    whole_slide_image: Option<Json<ImageDescriptor>>,
    cellavision_images: Json<BTreeMap<String, Vec<ImageDescriptor>>>,
    pyramid_outputs: Json<PyramidOutputs>,
    error_message: Option<String>,
    is_image_corrupted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            status: row
                .status
                .parse()
                .with_context(|| format!("job {} has an unreadable status", row.job_id))?,
            job_id: row.job_id,
            whole_slide_image: row.whole_slide_image.map(|Json(image)| image),
            cellavision_images: row.cellavision_images.0,
            pyramid_outputs: row.pyramid_outputs.0,
            error_message: row.error_message,
            is_image_corrupted: row.is_image_corrupted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for ingestion jobs stored in `upload_jobs`.
///
/// Nested descriptors are JSONB documents; every update touches a single path
/// with `jsonb_set` so concurrent writers do not overwrite each other.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobRepository {
    #[tracing::instrument(skip(self), fields(db.table = "upload_jobs", db.operation = "select", db.record_id = %job_id))]
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<Postgres, JobRow>(&format!(
            "SELECT {} FROM upload_jobs WHERE job_id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    #[tracing::instrument(skip(self, job), fields(db.table = "upload_jobs", db.operation = "insert", db.record_id = %job.job_id))]
    async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_jobs (
                job_id, status, whole_slide_image, cellavision_images, pyramid_outputs,
                error_message, is_image_corrupted, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.status.to_string())
        .bind(job.whole_slide_image.as_ref().map(Json))
        .bind(Json(&job.cellavision_images))
        .bind(Json(&job.pyramid_outputs))
        .bind(job.error_message.as_deref())
        .bind(job.is_image_corrupted)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert job {}", job.job_id))?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE upload_jobs SET status = $2, updated_at = NOW() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Job not found: {}", job_id);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, message), fields(db.table = "upload_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn record_failure(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
        image_corrupted: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE upload_jobs
            SET status = $2,
                error_message = $3,
                is_image_corrupted = is_image_corrupted OR $4,
                updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.to_string())
        .bind(message)
        .bind(image_corrupted)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Job not found: {}", job_id);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, cdn_url), fields(db.table = "upload_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn set_cell_image_cdn_url(
        &self,
        job_id: &str,
        cell_type: &str,
        index: usize,
        cdn_url: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE upload_jobs
            SET cellavision_images = jsonb_set(
                    cellavision_images,
                    ARRAY[$2::text, $3::text, 'blob_storage', 'cdn_url'],
                    to_jsonb($4::text)
                ),
                updated_at = NOW()
            WHERE job_id = $1
              AND jsonb_typeof(cellavision_images #> ARRAY[$2::text, $3::text, 'blob_storage']) = 'object'
              AND (cellavision_images #>> ARRAY[$2::text, $3::text, 'blob_storage', 'cdn_url']) IS NULL
            "#,
        )
        .bind(job_id)
        .bind(cell_type)
        .bind(index.to_string())
        .bind(cdn_url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, cdn_url), fields(db.table = "upload_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn set_whole_slide_cdn_url(&self, job_id: &str, cdn_url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE upload_jobs
            SET whole_slide_image = jsonb_set(
                    whole_slide_image,
                    '{blob_storage,cdn_url}',
                    to_jsonb($2::text)
                ),
                updated_at = NOW()
            WHERE job_id = $1
              AND jsonb_typeof(whole_slide_image -> 'blob_storage') = 'object'
              AND (whole_slide_image #>> '{blob_storage,cdn_url}') IS NULL
            "#,
        )
        .bind(job_id)
        .bind(cdn_url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, output), fields(db.table = "upload_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn append_pyramid_output(&self, job_id: &str, output: &PyramidOutput) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE upload_jobs
            SET pyramid_outputs = jsonb_set(
                    COALESCE(pyramid_outputs, '{}'::jsonb),
                    '{whole_slide}',
                    COALESCE(
                        (SELECT jsonb_agg(existing)
                         FROM jsonb_array_elements(
                             COALESCE(pyramid_outputs -> 'whole_slide', '[]'::jsonb)
                         ) AS existing
                         WHERE existing ->> 'dzi_key' IS DISTINCT FROM $3),
                        '[]'::jsonb
                    ) || jsonb_build_array($2::jsonb),
                    true
                ),
                updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(Json(output))
        .bind(&output.dzi_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Job not found: {}", job_id);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "upload_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn reset_for_reprocess(&self, job_id: &str) -> Result<bool> {
        let resettable: Vec<String> = JobStatus::ALL
            .iter()
            .filter(|status| status.is_terminal() || **status == JobStatus::Ingested)
            .map(ToString::to_string)
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE upload_jobs
            SET status = $2,
                error_message = NULL,
                is_image_corrupted = FALSE,
                updated_at = NOW()
            WHERE job_id = $1 AND status = ANY($3)
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Ingested.to_string())
        .bind(&resettable)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
