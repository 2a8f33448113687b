//! Configuration module
//!
//! Worker configuration is read from the environment (optionally seeded from a
//! `.env` file) and validated once at start-up.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_MAX_DECODED_PIXELS, DEFAULT_TILE_DEPTH, DEFAULT_TILE_JPEG_QUALITY,
    MIN_MULTIPART_PART_SIZE_BYTES,
};
use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const CLAMAV_PORT: u16 = 3310;
const CLAMAV_TIMEOUT_SECS: u64 = 120;
const UPLOAD_MULTIPART_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const UPLOAD_PART_SIZE_BYTES: usize = 10 * 1024 * 1024;
const UPLOAD_MULTIPART_CONCURRENCY: usize = 4;
const TILE_UPLOAD_BATCH_SIZE: usize = 50;
const QUEUE_TOPIC: &str = "image-processing";
const QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const QUEUE_MAX_DELIVERIES: u32 = 3;
const JOB_TIMEOUT_SECS: u64 = 14_400;
const VISIBILITY_GRACE_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// `json` switches the log output to one JSON object per line.
    pub log_format: String,
}

/// Ingestion worker configuration
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub base: BaseConfig,
    pub database_url: String,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket_raw: Option<String>,
    pub s3_bucket_processed: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub aws_region: Option<String>,
    pub local_storage_path: Option<String>,
    pub cdn_domain: String,
    pub upload_multipart_threshold_bytes: u64,
    pub upload_part_size_bytes: usize,
    pub upload_multipart_concurrency: usize,
    // ClamAV configuration
    pub clamav_host: String,
    pub clamav_port: u16,
    pub clamav_timeout_secs: u64,
    // Tiling configuration
    pub scratch_dir: PathBuf,
    pub tile_jpeg_quality: u8,
    /// `onepixel` or `onetile`.
    pub tile_depth: String,
    pub tile_max_decoded_pixels: u64,
    pub tile_upload_batch_size: usize,
    // Queue configuration
    pub queue_topic: String,
    pub queue_poll_interval_ms: u64,
    pub queue_visibility_timeout_secs: u64,
    pub queue_max_deliveries: u32,
    pub job_timeout_secs: u64,
}

/// Application configuration (ingestion worker).
#[derive(Clone, Debug)]
pub struct Config(pub Box<WorkerConfig>);

impl Config {
    fn as_worker(&self) -> &WorkerConfig {
        &self.0
    }

    pub fn is_production(&self) -> bool {
        let environment = self.as_worker().base.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = WorkerConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_worker().validate()
    }

    pub fn environment(&self) -> &str {
        &self.as_worker().base.environment
    }

    pub fn log_format(&self) -> &str {
        &self.as_worker().base.log_format
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_worker().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_worker().base.db_timeout_seconds
    }

    pub fn database_url(&self) -> &str {
        &self.as_worker().database_url
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_worker().storage_backend
    }

    pub fn s3_bucket_raw(&self) -> Option<&str> {
        self.as_worker().s3_bucket_raw.as_deref()
    }

    pub fn s3_bucket_processed(&self) -> Option<&str> {
        self.as_worker().s3_bucket_processed.as_deref()
    }

    /// `S3_REGION`, falling back to `AWS_REGION`.
    pub fn s3_region(&self) -> Option<&str> {
        self.as_worker()
            .s3_region
            .as_deref()
            .or(self.as_worker().aws_region.as_deref())
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_worker().s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.as_worker().local_storage_path.as_deref()
    }

    pub fn cdn_domain(&self) -> &str {
        &self.as_worker().cdn_domain
    }

    pub fn upload_multipart_threshold_bytes(&self) -> u64 {
        self.as_worker().upload_multipart_threshold_bytes
    }

    pub fn upload_part_size_bytes(&self) -> usize {
        self.as_worker().upload_part_size_bytes
    }

    pub fn upload_multipart_concurrency(&self) -> usize {
        self.as_worker().upload_multipart_concurrency
    }

    pub fn clamav_host(&self) -> &str {
        &self.as_worker().clamav_host
    }

    pub fn clamav_port(&self) -> u16 {
        self.as_worker().clamav_port
    }

    pub fn clamav_timeout_secs(&self) -> u64 {
        self.as_worker().clamav_timeout_secs
    }

    pub fn scratch_dir(&self) -> &PathBuf {
        &self.as_worker().scratch_dir
    }

    pub fn tile_jpeg_quality(&self) -> u8 {
        self.as_worker().tile_jpeg_quality
    }

    pub fn tile_depth(&self) -> &str {
        &self.as_worker().tile_depth
    }

    pub fn tile_max_decoded_pixels(&self) -> u64 {
        self.as_worker().tile_max_decoded_pixels
    }

    pub fn tile_upload_batch_size(&self) -> usize {
        self.as_worker().tile_upload_batch_size
    }

    pub fn queue_topic(&self) -> &str {
        &self.as_worker().queue_topic
    }

    pub fn queue_poll_interval_ms(&self) -> u64 {
        self.as_worker().queue_poll_interval_ms
    }

    pub fn queue_visibility_timeout_secs(&self) -> u64 {
        self.as_worker().queue_visibility_timeout_secs
    }

    pub fn queue_max_deliveries(&self) -> u32 {
        self.as_worker().queue_max_deliveries
    }

    pub fn job_timeout_secs(&self) -> u64 {
        self.as_worker().job_timeout_secs
    }
}

/// Read `name` and parse it, falling back to `default` when unset.
/// A value that is set but unparseable is an error rather than a silent default.
fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, anyhow::Error> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid value, got '{}'", name, raw)),
        _ => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            environment,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", MAX_CONNECTIONS)?,
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS)?,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        };

        let storage_backend = match env_opt("STORAGE_BACKEND") {
            Some(raw) => raw.parse::<StorageBackend>()?,
            None => StorageBackend::S3,
        };

        let job_timeout_secs = env_parse("JOB_TIMEOUT_SECS", JOB_TIMEOUT_SECS)?;

        Ok(WorkerConfig {
            base,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            storage_backend,
            s3_bucket_raw: env_opt("S3_BUCKET_RAW"),
            s3_bucket_processed: env_opt("S3_BUCKET_PROCESSED"),
            s3_region: env_opt("S3_REGION"),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            aws_region: env_opt("AWS_REGION"),
            local_storage_path: env_opt("LOCAL_STORAGE_PATH"),
            cdn_domain: env_opt("CDN_DOMAIN")
                .ok_or_else(|| anyhow::anyhow!("CDN_DOMAIN must be set"))?,
            upload_multipart_threshold_bytes: env_parse(
                "UPLOAD_MULTIPART_THRESHOLD_BYTES",
                UPLOAD_MULTIPART_THRESHOLD_BYTES,
            )?,
            upload_part_size_bytes: env_parse("UPLOAD_PART_SIZE_BYTES", UPLOAD_PART_SIZE_BYTES)?,
            upload_multipart_concurrency: env_parse(
                "UPLOAD_MULTIPART_CONCURRENCY",
                UPLOAD_MULTIPART_CONCURRENCY,
            )?,
            clamav_host: env::var("CLAMAV_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            clamav_port: env_parse("CLAMAV_PORT", CLAMAV_PORT)?,
            clamav_timeout_secs: env_parse("CLAMAV_TIMEOUT_SECS", CLAMAV_TIMEOUT_SECS)?,
            scratch_dir: env_opt("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            tile_jpeg_quality: env_parse("TILE_JPEG_QUALITY", DEFAULT_TILE_JPEG_QUALITY)?,
            tile_depth: env::var("TILE_DEPTH")
                .map(|depth| depth.trim().to_lowercase())
                .unwrap_or_else(|_| DEFAULT_TILE_DEPTH.to_string()),
            tile_max_decoded_pixels: env_parse(
                "TILE_MAX_DECODED_PIXELS",
                DEFAULT_MAX_DECODED_PIXELS,
            )?,
            tile_upload_batch_size: env_parse("TILE_UPLOAD_BATCH_SIZE", TILE_UPLOAD_BATCH_SIZE)?,
            queue_topic: env::var("QUEUE_TOPIC").unwrap_or_else(|_| QUEUE_TOPIC.to_string()),
            queue_poll_interval_ms: env_parse("QUEUE_POLL_INTERVAL_MS", QUEUE_POLL_INTERVAL_MS)?,
            queue_visibility_timeout_secs: env_parse(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                job_timeout_secs + VISIBILITY_GRACE_SECS,
            )?,
            queue_max_deliveries: env_parse("QUEUE_MAX_DELIVERIES", QUEUE_MAX_DELIVERIES)?,
            job_timeout_secs,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket_raw.is_none() || self.s3_bucket_processed.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET_RAW and S3_BUCKET_PROCESSED must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() && self.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        if self.cdn_domain.trim().is_empty() {
            return Err(anyhow::anyhow!("CDN_DOMAIN must not be empty"));
        }

        if self.upload_part_size_bytes < MIN_MULTIPART_PART_SIZE_BYTES {
            return Err(anyhow::anyhow!(
                "UPLOAD_PART_SIZE_BYTES must be at least {} bytes",
                MIN_MULTIPART_PART_SIZE_BYTES
            ));
        }

        if self.upload_multipart_concurrency == 0 || self.tile_upload_batch_size == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_MULTIPART_CONCURRENCY and TILE_UPLOAD_BATCH_SIZE must be greater than 0"
            ));
        }

        if !matches!(self.tile_depth.as_str(), "onepixel" | "onetile") {
            return Err(anyhow::anyhow!(
                "TILE_DEPTH must be onepixel or onetile, got {}",
                self.tile_depth
            ));
        }

        if self.tile_max_decoded_pixels == 0 {
            return Err(anyhow::anyhow!("TILE_MAX_DECODED_PIXELS must be greater than 0"));
        }

        if !(1..=100).contains(&self.tile_jpeg_quality) {
            return Err(anyhow::anyhow!("TILE_JPEG_QUALITY must be between 1 and 100"));
        }

        if self.queue_max_deliveries == 0 {
            return Err(anyhow::anyhow!("QUEUE_MAX_DELIVERIES must be at least 1"));
        }

        // A message must stay invisible for as long as its job may run, or a
        // healthy job would be delivered to a second worker.
        if self.queue_visibility_timeout_secs <= self.job_timeout_secs {
            return Err(anyhow::anyhow!(
                "QUEUE_VISIBILITY_TIMEOUT_SECS ({}) must exceed JOB_TIMEOUT_SECS ({})",
                self.queue_visibility_timeout_secs,
                self.job_timeout_secs
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> WorkerConfig {
        WorkerConfig {
            base: BaseConfig {
                environment: "test".to_string(),
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
                log_format: "text".to_string(),
            },
            database_url: "postgresql://localhost/slidepipe".to_string(),
            storage_backend: StorageBackend::S3,
            s3_bucket_raw: Some("slides-raw".to_string()),
            s3_bucket_processed: Some("slides-processed".to_string()),
            s3_region: None,
            s3_endpoint: None,
            aws_region: Some("eu-west-1".to_string()),
            local_storage_path: None,
            cdn_domain: "cdn.example.com".to_string(),
            upload_multipart_threshold_bytes: UPLOAD_MULTIPART_THRESHOLD_BYTES,
            upload_part_size_bytes: UPLOAD_PART_SIZE_BYTES,
            upload_multipart_concurrency: UPLOAD_MULTIPART_CONCURRENCY,
            clamav_host: "127.0.0.1".to_string(),
            clamav_port: CLAMAV_PORT,
            clamav_timeout_secs: CLAMAV_TIMEOUT_SECS,
            scratch_dir: env::temp_dir(),
            tile_jpeg_quality: DEFAULT_TILE_JPEG_QUALITY,
            tile_depth: DEFAULT_TILE_DEPTH.to_string(),
            tile_max_decoded_pixels: DEFAULT_MAX_DECODED_PIXELS,
            tile_upload_batch_size: TILE_UPLOAD_BATCH_SIZE,
            queue_topic: QUEUE_TOPIC.to_string(),
            queue_poll_interval_ms: QUEUE_POLL_INTERVAL_MS,
            queue_visibility_timeout_secs: JOB_TIMEOUT_SECS + VISIBILITY_GRACE_SECS,
            queue_max_deliveries: QUEUE_MAX_DELIVERIES,
            job_timeout_secs: JOB_TIMEOUT_SECS,
        }
    }

    #[test]
    fn default_shaped_config_is_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn s3_backend_requires_both_buckets() {
        let mut config = valid_config();
        config.s3_bucket_processed = None;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("S3_BUCKET_PROCESSED"));
    }

    #[test]
    fn local_backend_requires_path() {
        let mut config = valid_config();
        config.storage_backend = StorageBackend::Local;
        assert!(config.validate().is_err());
        config.local_storage_path = Some("/var/lib/slidepipe".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_postgres_url() {
        let mut config = valid_config();
        config.database_url = "mysql://localhost/slidepipe".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn visibility_timeout_must_outlast_job_timeout() {
        let mut config = valid_config();
        config.queue_visibility_timeout_secs = config.job_timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn part_size_below_s3_minimum_is_rejected() {
        let mut config = valid_config();
        config.upload_part_size_bytes = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tile_depth_must_be_known() {
        let mut config = valid_config();
        config.tile_depth = "onetile".to_string();
        assert!(config.validate().is_ok());
        config.tile_depth = "onemillion".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("TILE_DEPTH"));
    }

    #[test]
    fn region_falls_back_to_aws_region() {
        let config = Config(Box::new(valid_config()));
        assert_eq!(config.s3_region(), Some("eu-west-1"));
    }
}
