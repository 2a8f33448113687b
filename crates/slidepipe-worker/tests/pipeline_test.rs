//! End-to-end runs of the job pipeline against in-memory collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use slidepipe_core::{BlobArea, ImageDescriptor, Job, JobStatus};
use slidepipe_db::{InMemoryJobStore, JobStore};
use slidepipe_processing::{
    DeepZoomTiler, ProcessingError, PyramidTiler, SceneAnalyzer, SceneInfo, SlideSceneAnalyzer,
    TiledPyramid, TilingOptions,
};
use slidepipe_services::{MalwareScanner, ScanFailure, ScanOutcome};
use slidepipe_storage::{
    keys, BlobStorage, ByteStream, ObjectBlobStore, StorageError, StorageResult, UploadReceipt,
};
use slidepipe_worker::{
    ConsumerConfig, InMemoryJobQueue, JobConsumer, JobMessage, JobOrchestrator, JobOutcome,
    JobQueue, PipelineSettings, WorkerContext,
};
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncRead;

const CDN: &str = "cdn.example.com";
const INFECTED_MARKER: &[u8] = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR";
const UNSCANNABLE_MARKER: &[u8] = b"UNSCANNABLE";

/// Reads the whole stream; flags the EICAR marker as infected.
#[derive(Default)]
struct FakeScanner {
    scans: AtomicUsize,
}

#[async_trait]
impl MalwareScanner for FakeScanner {
    async fn scan(&self, mut stream: ByteStream) -> Result<ScanOutcome, ScanFailure> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ScanFailure::SourceRead(e.to_string()))?;
            data.extend_from_slice(&chunk);
        }
        let contains = |marker: &[u8]| data.windows(marker.len()).any(|w| w == marker);
        if contains(UNSCANNABLE_MARKER) {
            Err(ScanFailure::Protocol("INSTREAM size limit exceeded".to_string()))
        } else if contains(INFECTED_MARKER) {
            Ok(ScanOutcome::Infected(vec!["Eicar-Test-Signature".to_string()]))
        } else {
            Ok(ScanOutcome::Clean)
        }
    }

    async fn ping(&self) -> Result<(), ScanFailure> {
        Ok(())
    }
}

struct FixedAnalyzer;

#[async_trait]
impl SceneAnalyzer for FixedAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<SceneInfo, ProcessingError> {
        assert!(path.exists(), "source must be downloaded before analysis");
        Ok(SceneInfo {
            scene_count: 1,
            width: 1500,
            height: 1200,
            format: "tiff".to_string(),
        })
    }
}

/// Writes a 3-level pyramid of 1 + 9 + 30 = 40 tiles.
#[derive(Default)]
struct FakeTiler {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

const FAKE_GRIDS: [(u32, u32); 3] = [(1, 1), (3, 3), (6, 5)];

#[async_trait]
impl PyramidTiler for FakeTiler {
    async fn tile(
        &self,
        source: &Path,
        output_dir: &Path,
        base_name: &str,
    ) -> Result<TiledPyramid, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(source.exists());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let tile_root = output_dir.join(format!("{}_files", base_name));
        let mut tile_count = 0u64;
        for (level, (cols, rows)) in FAKE_GRIDS.iter().enumerate() {
            let dir = tile_root.join(level.to_string());
            tokio::fs::create_dir_all(&dir).await?;
            for col in 0..*cols {
                for row in 0..*rows {
                    tokio::fs::write(dir.join(format!("{}_{}.jpeg", col, row)), b"jpeg").await?;
                    tile_count += 1;
                }
            }
        }
        tokio::fs::write(tile_root.join("vips-properties.xml"), b"<properties/>").await?;

        let manifest_path = output_dir.join(format!("{}.dzi", base_name));
        tokio::fs::write(&manifest_path, b"<Image TileSize=\"256\"/>").await?;

        Ok(TiledPyramid {
            manifest_path,
            tile_root,
            width: 1500,
            height: 1200,
            levels: FAKE_GRIDS.len() as u32,
            tile_count,
            tile_size: 256,
            overlap: 0,
            format: "jpeg".to_string(),
        })
    }
}

/// Object store whose processed-area uploads start failing after a number of successes.
struct FlakyBlobStore {
    inner: Arc<ObjectBlobStore>,
    processed_uploads: AtomicUsize,
    fail_after: usize,
}

#[async_trait]
impl BlobStorage for FlakyBlobStore {
    async fn upload_raw(
        &self,
        key: &str,
        content_type: &str,
        content_length: Option<u64>,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<UploadReceipt> {
        self.inner
            .upload_raw(key, content_type, content_length, reader)
            .await
    }

    async fn upload_processed(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<UploadReceipt> {
        let attempt = self.processed_uploads.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.fail_after {
            return Err(StorageError::UploadFailed(format!(
                "injected failure for {}",
                key
            )));
        }
        self.inner.upload_processed(key, content_type, data).await
    }

    async fn get_stream(&self, area: BlobArea, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(area, key).await
    }

    async fn exists(&self, area: BlobArea, key: &str) -> StorageResult<bool> {
        self.inner.exists(area, key).await
    }

    async fn list(&self, area: BlobArea, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(area, prefix).await
    }

    async fn delete(&self, area: BlobArea, key: &str) -> StorageResult<()> {
        self.inner.delete(area, key).await
    }

    fn cdn_url(&self, key: &str) -> String {
        self.inner.cdn_url(key)
    }

    fn bucket(&self, area: BlobArea) -> &str {
        self.inner.bucket(area)
    }
}

struct Harness {
    store: Arc<InMemoryJobStore>,
    storage: Arc<ObjectBlobStore>,
    scanner: Arc<FakeScanner>,
    scratch: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryJobStore::new()),
            storage: Arc::new(ObjectBlobStore::in_memory(CDN)),
            scanner: Arc::new(FakeScanner::default()),
            scratch: TempDir::new().unwrap(),
        }
    }

    fn context(
        &self,
        storage: Arc<dyn BlobStorage>,
        analyzer: Arc<dyn SceneAnalyzer>,
        tiler: Arc<dyn PyramidTiler>,
        batch_size: usize,
    ) -> WorkerContext {
        WorkerContext {
            job_store: self.store.clone(),
            storage,
            scanner: self.scanner.clone(),
            analyzer,
            tiler,
            settings: PipelineSettings {
                scratch_dir: self.scratch.path().to_path_buf(),
                job_timeout: Duration::from_secs(30),
                tile_upload_batch_size: batch_size,
            },
        }
    }

    fn orchestrator(&self, tiler: Arc<FakeTiler>) -> JobOrchestrator {
        JobOrchestrator::new(self.context(
            self.storage.clone(),
            Arc::new(FixedAnalyzer),
            tiler,
            50,
        ))
    }

    async fn stored_image(&self, key: &str, filename: &str, data: &[u8]) -> ImageDescriptor {
        let receipt = self
            .storage
            .upload_raw_bytes(key, "application/octet-stream", Bytes::copy_from_slice(data))
            .await
            .unwrap();
        ImageDescriptor::new(filename, "application/octet-stream", data.len() as u64)
            .with_blob(receipt.into_location(None))
    }

    async fn whole_slide(&self, job_id: &str, filename: &str, data: &[u8]) -> ImageDescriptor {
        self.stored_image(&keys::whole_slide_key(job_id, filename), filename, data)
            .await
    }

    async fn cell(&self, job_id: &str, cell_type: &str, filename: &str, data: &[u8]) -> ImageDescriptor {
        self.stored_image(&keys::cell_image_key(job_id, cell_type, filename), filename, data)
            .await
    }

    async fn job(&self, job_id: &str) -> Job {
        self.store.get_job(job_id).await.unwrap().unwrap()
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().count() == 0
    }
}

#[tokio::test]
async fn clean_slide_is_tiled_and_published() {
    let h = Harness::new();
    let slide = h.whole_slide("job-a", "slide-001.tiff", b"II*\0 slide bytes").await;
    let cell = h.cell("job-a", "lymphocyte", "cell_01.jpg", b"cell").await;
    h.store
        .insert_job(
            &Job::new("job-a")
                .with_whole_slide(slide)
                .with_cell_image("lymphocyte", cell),
        )
        .await
        .unwrap();

    let tiler = Arc::new(FakeTiler::default());
    let outcome = h.orchestrator(tiler.clone()).handle("job-a").await.unwrap();
    assert_eq!(outcome, JobOutcome::Finished(JobStatus::Ready));

    let job = h.job("job-a").await;
    assert_eq!(job.status, JobStatus::Ready);
    assert!(job.error_message.is_none());
    assert!(!job.is_image_corrupted);

    let outputs = &job.pyramid_outputs.whole_slide;
    assert_eq!(outputs.len(), 1);
    let output = &outputs[0];
    assert_eq!(output.tile_count, 40);
    assert_eq!(output.pyramid_levels, 3);
    assert_eq!(output.scene_name, "scene0");
    assert_eq!(output.tiles_prefix, "processed/slide-001/scene0_z0_c0_files");
    assert_eq!(
        output.dzi_key,
        "uploads/job-a/full_slide_dzi/slide-001/scene0_z0_c0.dzi"
    );
    assert_eq!(
        output.dzi_url,
        format!("https://{}/{}", CDN, output.dzi_key)
    );

    let tiles = h
        .storage
        .list(BlobArea::Processed, &output.tiles_prefix)
        .await
        .unwrap();
    assert_eq!(tiles.len() as u64, output.tile_count);
    assert!(tiles.iter().all(|key| key.ends_with(".jpeg")));
    assert!(h
        .storage
        .exists(BlobArea::Processed, &output.dzi_key)
        .await
        .unwrap());

    let slide_location = job.whole_slide_image.unwrap().blob_storage.unwrap();
    assert_eq!(
        slide_location.cdn_url,
        Some(format!("https://{}/{}", CDN, slide_location.key))
    );
    let cell_location = job.cellavision_images["lymphocyte"][0]
        .blob_storage
        .clone()
        .unwrap();
    assert!(cell_location.cdn_url.is_some());

    assert_eq!(h.scanner.scans.load(Ordering::SeqCst), 2);
    assert_eq!(tiler.calls.load(Ordering::SeqCst), 1);
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn infected_cell_image_stops_the_job() {
    let h = Harness::new();
    let slide = h.whole_slide("job-b", "slide.tiff", b"slide").await;
    let clean = h.cell("job-b", "lymphocyte", "a.jpg", b"clean").await;
    let mut infected_bytes = b"header ".to_vec();
    infected_bytes.extend_from_slice(INFECTED_MARKER);
    let infected = h.cell("job-b", "neutrophil", "b.jpg", &infected_bytes).await;
    let never_scanned = h.cell("job-b", "neutrophil", "c.jpg", b"clean").await;
    h.store
        .insert_job(
            &Job::new("job-b")
                .with_whole_slide(slide)
                .with_cell_image("neutrophil", infected)
                .with_cell_image("neutrophil", never_scanned)
                .with_cell_image("lymphocyte", clean),
        )
        .await
        .unwrap();

    let tiler = Arc::new(FakeTiler::default());
    let outcome = h.orchestrator(tiler.clone()).handle("job-b").await.unwrap();
    assert_eq!(outcome, JobOutcome::Finished(JobStatus::Failed));

    let job = h.job("job-b").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.is_image_corrupted);
    let message = job.error_message.unwrap();
    assert!(message.contains("b.jpg"), "message was: {}", message);
    assert!(message.contains("neutrophil"));
    assert!(job.pyramid_outputs.whole_slide.is_empty());

    // lymphocyte/a.jpg then neutrophil/b.jpg; c.jpg and the slide are never scanned
    assert_eq!(h.scanner.scans.load(Ordering::SeqCst), 2);
    assert_eq!(tiler.calls.load(Ordering::SeqCst), 0);
    assert!(h
        .storage
        .list(BlobArea::Processed, "processed/")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn infected_whole_slide_is_never_tiled() {
    let h = Harness::new();
    let slide = h.whole_slide("job-w", "slide.svs", INFECTED_MARKER).await;
    h.store
        .insert_job(&Job::new("job-w").with_whole_slide(slide))
        .await
        .unwrap();

    let tiler = Arc::new(FakeTiler::default());
    h.orchestrator(tiler.clone()).handle("job-w").await.unwrap();

    let job = h.job("job-w").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.is_image_corrupted);
    assert!(job.error_message.unwrap().contains("slide.svs"));
    assert_eq!(tiler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scan_error_fails_without_corruption_flag() {
    let h = Harness::new();
    let cell = h.cell("job-e", "basophil", "big.jpg", UNSCANNABLE_MARKER).await;
    h.store
        .insert_job(&Job::new("job-e").with_cell_image("basophil", cell))
        .await
        .unwrap();

    h.orchestrator(Arc::new(FakeTiler::default()))
        .handle("job-e")
        .await
        .unwrap();

    let job = h.job("job-e").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(!job.is_image_corrupted);
    let message = job.error_message.unwrap();
    assert!(message.contains("big.jpg"));
    assert!(message.contains("size limit"));
}

#[tokio::test]
async fn unknown_job_is_dropped_without_a_record() {
    let h = Harness::new();
    let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(60)));
    queue.publish(&JobMessage::new("ghost")).await.unwrap();

    let consumer = JobConsumer::new(
        queue.clone(),
        h.orchestrator(Arc::new(FakeTiler::default())),
        ConsumerConfig::default(),
    );
    assert!(consumer.run_once().await.unwrap());
    assert!(queue.is_empty());
    assert!(h.store.get_job("ghost").await.unwrap().is_none());
    assert!(!consumer.run_once().await.unwrap());
}

#[tokio::test]
async fn failed_tile_batch_leaves_job_partially_processed() {
    let h = Harness::new();
    let slide = h.whole_slide("job-d", "slide.tiff", b"slide").await;
    h.store
        .insert_job(&Job::new("job-d").with_whole_slide(slide))
        .await
        .unwrap();

    // 40 tiles in batches of 8 is 5 batches; batch 3 hits the failure
    let flaky = Arc::new(FlakyBlobStore {
        inner: h.storage.clone(),
        processed_uploads: AtomicUsize::new(0),
        fail_after: 16,
    });
    let orchestrator = JobOrchestrator::new(h.context(
        flaky.clone(),
        Arc::new(FixedAnalyzer),
        Arc::new(FakeTiler::default()),
        8,
    ));

    let outcome = orchestrator.handle("job-d").await.unwrap();
    assert_eq!(outcome, JobOutcome::Finished(JobStatus::PartiallyProcessed));

    let job = h.job("job-d").await;
    assert_eq!(job.status, JobStatus::PartiallyProcessed);
    assert!(!job.is_image_corrupted);
    assert!(job.pyramid_outputs.whole_slide.is_empty());
    assert!(job.error_message.unwrap().contains("Tile upload failed"));

    let uploaded = h
        .storage
        .list(BlobArea::Processed, "processed/slide/")
        .await
        .unwrap();
    assert_eq!(uploaded.len(), 16);
    assert!(!h
        .storage
        .exists(
            BlobArea::Processed,
            &keys::manifest_key("job-d", "slide")
        )
        .await
        .unwrap());
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn duplicate_delivery_does_not_repeat_work() {
    let h = Harness::new();
    let slide = h.whole_slide("job-r", "slide.tiff", b"slide").await;
    h.store
        .insert_job(&Job::new("job-r").with_whole_slide(slide))
        .await
        .unwrap();

    let tiler = Arc::new(FakeTiler::default());
    let orchestrator = h.orchestrator(tiler.clone());
    orchestrator.handle("job-r").await.unwrap();
    let first = h.job("job-r").await;

    let outcome = orchestrator.handle("job-r").await.unwrap();
    assert_eq!(outcome, JobOutcome::AlreadyFinished(JobStatus::Ready));

    let second = h.job("job-r").await;
    assert_eq!(second.pyramid_outputs.whole_slide.len(), 1);
    assert_eq!(
        second.whole_slide_image.unwrap().blob_storage.unwrap().cdn_url,
        first.whole_slide_image.unwrap().blob_storage.unwrap().cdn_url
    );
    assert_eq!(tiler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn existing_cdn_urls_are_left_alone() {
    let h = Harness::new();
    let mut cell = h.cell("job-c", "monocyte", "m.jpg", b"cell").await;
    if let Some(location) = cell.blob_storage.as_mut() {
        location.cdn_url = Some("https://legacy.example.com/m.jpg".to_string());
    }
    let fresh = h.cell("job-c", "monocyte", "n.jpg", b"cell").await;
    h.store
        .insert_job(
            &Job::new("job-c")
                .with_cell_image("monocyte", cell)
                .with_cell_image("monocyte", fresh),
        )
        .await
        .unwrap();

    let outcome = h
        .orchestrator(Arc::new(FakeTiler::default()))
        .handle("job-c")
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Finished(JobStatus::Ready));

    let job = h.job("job-c").await;
    let images = &job.cellavision_images["monocyte"];
    assert_eq!(
        images[0].blob_storage.as_ref().unwrap().cdn_url.as_deref(),
        Some("https://legacy.example.com/m.jpg")
    );
    assert_eq!(
        images[1].blob_storage.as_ref().unwrap().cdn_url,
        Some(format!(
            "https://{}/{}",
            CDN,
            keys::cell_image_key("job-c", "monocyte", "n.jpg")
        ))
    );
    assert!(job.pyramid_outputs.whole_slide.is_empty());
}

#[tokio::test]
async fn watchdog_fails_stuck_job_and_cleans_scratch() {
    let h = Harness::new();
    let slide = h.whole_slide("job-t", "slide.tiff", b"slide").await;
    h.store
        .insert_job(&Job::new("job-t").with_whole_slide(slide))
        .await
        .unwrap();

    let tiler = Arc::new(FakeTiler {
        delay: Some(Duration::from_secs(5)),
        ..FakeTiler::default()
    });
    let mut ctx = h.context(h.storage.clone(), Arc::new(FixedAnalyzer), tiler, 50);
    ctx.settings.job_timeout = Duration::from_millis(200);

    let outcome = JobOrchestrator::new(ctx).handle("job-t").await.unwrap();
    assert_eq!(outcome, JobOutcome::Finished(JobStatus::Failed));

    let job = h.job("job-t").await;
    assert!(job.error_message.unwrap().contains("processing limit"));
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn redelivered_message_past_limit_fails_the_job() {
    let h = Harness::new();
    h.store.insert_job(&Job::new("job-x")).await.unwrap();
    h.store
        .update_status("job-x", JobStatus::Tiling)
        .await
        .unwrap();

    let queue = Arc::new(InMemoryJobQueue::new(Duration::ZERO));
    queue.publish(&JobMessage::new("job-x")).await.unwrap();
    // first delivery lost with a crashed worker
    queue.receive().await.unwrap().unwrap();

    let consumer = JobConsumer::new(
        queue.clone(),
        h.orchestrator(Arc::new(FakeTiler::default())),
        ConsumerConfig {
            poll_interval_ms: 10,
            max_deliveries: 1,
        },
    );
    assert!(consumer.run_once().await.unwrap());

    let job = h.job("job-x").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Job exceeded 1 delivery attempts")
    );
    assert!(queue.is_empty());
}

#[tokio::test]
async fn undecodable_message_is_acknowledged() {
    let h = Harness::new();
    let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(60)));
    queue
        .publish_raw(serde_json::json!({ "id": 12 }))
        .unwrap();

    let consumer = JobConsumer::new(
        queue.clone(),
        h.orchestrator(Arc::new(FakeTiler::default())),
        ConsumerConfig::default(),
    );
    assert!(consumer.run_once().await.unwrap());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn consumer_stops_on_shutdown() {
    let h = Harness::new();
    let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(60)));
    let consumer = JobConsumer::new(
        queue,
        h.orchestrator(Arc::new(FakeTiler::default())),
        ConsumerConfig::default(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), consumer.run(shutdown_rx))
        .await
        .unwrap();
}

#[tokio::test]
async fn real_image_round_trip() {
    let h = Harness::new();
    let mut png = Vec::new();
    image::RgbImage::from_pixel(600, 400, image::Rgb([180, 90, 60]))
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    let slide = h.whole_slide("job-p", "scan.png", &png).await;
    h.store
        .insert_job(&Job::new("job-p").with_whole_slide(slide))
        .await
        .unwrap();

    let orchestrator = JobOrchestrator::new(h.context(
        h.storage.clone(),
        Arc::new(SlideSceneAnalyzer),
        Arc::new(DeepZoomTiler::default()),
        4,
    ));
    let outcome = orchestrator.handle("job-p").await.unwrap();
    assert_eq!(outcome, JobOutcome::Finished(JobStatus::Ready));

    let job = h.job("job-p").await;
    let output = &job.pyramid_outputs.whole_slide[0];
    assert_eq!(output.image_width, 600);
    assert_eq!(output.image_height, 400);
    assert_eq!(output.pyramid_levels, 11);
    assert_eq!(output.tile_count, 17);

    let tiles = h
        .storage
        .list(BlobArea::Processed, &output.tiles_prefix)
        .await
        .unwrap();
    assert_eq!(tiles.len() as u64, output.tile_count);
    assert!(tiles.contains(&format!("{}/10/2_1.jpeg", output.tiles_prefix)));
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn undecodable_slide_is_flagged_corrupt() {
    let h = Harness::new();
    let slide = h.whole_slide("job-z", "broken.tiff", b"definitely not a slide").await;
    h.store
        .insert_job(&Job::new("job-z").with_whole_slide(slide))
        .await
        .unwrap();

    let orchestrator = JobOrchestrator::new(h.context(
        h.storage.clone(),
        Arc::new(SlideSceneAnalyzer),
        Arc::new(FakeTiler::default()),
        50,
    ));
    orchestrator.handle("job-z").await.unwrap();

    let job = h.job("job-z").await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.is_image_corrupted);
    assert!(job.error_message.unwrap().contains("broken.tiff"));
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn job_ids_with_separators_stay_inside_scratch() {
    let h = Harness::new();
    for job_id in ["site-a/job-1", "../escape"] {
        let slide = h.whole_slide(job_id, "slide.tiff", b"II*\0 slide").await;
        h.store
            .insert_job(&Job::new(job_id).with_whole_slide(slide))
            .await
            .unwrap();

        let outcome = h
            .orchestrator(Arc::new(FakeTiler::default()))
            .handle(job_id)
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Finished(JobStatus::Ready), "{}", job_id);
        assert!(h.scratch_is_empty());
    }

    let parent = h.scratch.path().parent().unwrap();
    let escaped = std::fs::read_dir(parent)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name().to_string_lossy().starts_with("escape-"));
    assert!(!escaped);
}

#[tokio::test]
async fn slide_over_decode_budget_fails_without_corruption_flag() {
    let h = Harness::new();
    let mut png = Vec::new();
    image::RgbImage::from_pixel(600, 400, image::Rgb([10, 20, 30]))
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    let slide = h.whole_slide("job-big", "huge.png", &png).await;
    h.store
        .insert_job(&Job::new("job-big").with_whole_slide(slide))
        .await
        .unwrap();

    let tiler = DeepZoomTiler::new(TilingOptions {
        max_decoded_pixels: 10_000,
        ..TilingOptions::default()
    });
    let orchestrator = JobOrchestrator::new(h.context(
        h.storage.clone(),
        Arc::new(SlideSceneAnalyzer),
        Arc::new(tiler),
        50,
    ));
    let outcome = orchestrator.handle("job-big").await.unwrap();
    assert_eq!(outcome, JobOutcome::Finished(JobStatus::Failed));

    let job = h.job("job-big").await;
    assert!(!job.is_image_corrupted);
    assert!(job.error_message.unwrap().contains("decode budget"));
    assert!(job.pyramid_outputs.whole_slide.is_empty());
    assert!(h.scratch_is_empty());
}
