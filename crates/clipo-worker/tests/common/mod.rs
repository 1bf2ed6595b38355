//! Fakes shared by the worker integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use clipo_media::{MediaError, MediaInspector, MediaResult, ThumbnailExtractor};
use clipo_models::{Geometry, Record, RecordKey, RecordStatus, RecordUpdate};
use clipo_queue::{JobQueue, MemoryJobQueue};
use clipo_store::{MemoryRecordStore, RecordStore, StoreError, StoreResult};
use clipo_worker::{MediaService, Pipeline, WorkerConfig, WorkerPool};

/// One inspector call: which file, and when it ran.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: PathBuf,
    pub started: Instant,
    pub finished: Instant,
}

/// Inspector returning a fixed duration after `work` of simulated time.
pub struct FakeInspector {
    duration: f64,
    work: Duration,
    always_fail: bool,
    panics_left: AtomicU32,
    calls: Mutex<Vec<Call>>,
}

impl FakeInspector {
    pub fn returning(duration: f64) -> Self {
        Self {
            duration,
            work: Duration::ZERO,
            always_fail: false,
            panics_left: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::returning(0.0)
        }
    }

    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn panicking_once(self) -> Self {
        self.panicking_times(1)
    }

    pub fn panicking_times(self, panics: u32) -> Self {
        self.panics_left.store(panics, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MediaInspector for FakeInspector {
    async fn inspect(&self, path: &Path) -> MediaResult<f64> {
        let started = Instant::now();
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.calls.lock().push(Call {
            path: path.to_path_buf(),
            started,
            finished: Instant::now(),
        });

        if self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("inspector blew up");
        }
        if self.always_fail {
            return Err(MediaError::ffprobe_failed(
                "ffprobe exited with exit status: 1: Invalid data found when processing input",
                None,
            ));
        }
        Ok(self.duration)
    }
}

/// One thumbnail request.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub timestamp: f64,
    pub output: PathBuf,
    pub geometry: Geometry,
}

/// Thumbnailer that fails its first `failures` calls.
#[derive(Default)]
pub struct FakeThumbnailer {
    failures_left: AtomicU32,
    calls: Mutex<Vec<Extraction>>,
}

impl FakeThumbnailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Extraction> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ThumbnailExtractor for FakeThumbnailer {
    async fn extract(
        &self,
        _input_path: &Path,
        timestamp_seconds: f64,
        output_path: &Path,
        geometry: Geometry,
    ) -> MediaResult<()> {
        self.calls.lock().push(Extraction {
            timestamp: timestamp_seconds,
            output: output_path.to_path_buf(),
            geometry,
        });

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MediaError::ffmpeg_failed(
                "ffmpeg exited with exit status: 1: Conversion failed!",
                None,
                Some(1),
            ));
        }
        Ok(())
    }
}

/// Memory store that remembers every update it applied.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryRecordStore,
    updates: Mutex<Vec<(RecordKey, RecordUpdate)>>,
    rejected: Mutex<Option<RecordStatus>>,
}

impl RecordingStore {
    /// Fail every update that moves a record to `status`.
    pub fn reject_writes_of(&self, status: RecordStatus) {
        *self.rejected.lock() = Some(status);
    }

    pub fn updates_for(&self, key: &RecordKey) -> Vec<RecordUpdate> {
        self.updates
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Status transitions written for `key`, in order.
    pub fn statuses_for(&self, key: &RecordKey) -> Vec<RecordStatus> {
        self.updates_for(key)
            .into_iter()
            .filter_map(|u| u.status)
            .collect()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn create(&self, record: Record) -> StoreResult<RecordKey> {
        self.inner.create(record).await
    }

    async fn update(&self, key: &RecordKey, update: &RecordUpdate) -> StoreResult<()> {
        if update.status.is_some() && update.status == *self.rejected.lock() {
            return Err(StoreError::corrupt(key.as_str(), "disk full"));
        }
        self.inner.update(key, update).await?;
        self.updates.lock().push((key.clone(), update.clone()));
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        self.inner.get(key).await
    }

    async fn list(&self) -> StoreResult<Vec<Record>> {
        self.inner.list().await
    }
}

/// Everything a scenario needs, wired together in memory.
pub struct Harness {
    pub store: Arc<RecordingStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub inspector: Arc<FakeInspector>,
    pub thumbnailer: Arc<FakeThumbnailer>,
    pub service: MediaService,
    pub pool: WorkerPool,
}

pub fn worker_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        retry_backoff: Duration::from_secs(60),
        job_heartbeat_interval: Duration::from_secs(30),
        shutdown_timeout: Duration::from_secs(30),
        thumbnail_dir: PathBuf::from("/srv/thumbnails"),
        ..Default::default()
    }
}

pub fn spawn_pool(
    config: &WorkerConfig,
    store: &Arc<RecordingStore>,
    queue: &Arc<MemoryJobQueue>,
    inspector: &Arc<FakeInspector>,
    thumbnailer: &Arc<FakeThumbnailer>,
) -> WorkerPool {
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        inspector.clone(),
        thumbnailer.clone(),
        config,
        queue.max_retries(),
    ));
    WorkerPool::start(config, queue.clone(), pipeline)
}

impl Harness {
    pub fn start(
        concurrency: usize,
        inspector: FakeInspector,
        thumbnailer: FakeThumbnailer,
    ) -> Self {
        Self::start_with(
            worker_config(concurrency),
            MemoryJobQueue::new(3, Duration::from_secs(600)),
            inspector,
            thumbnailer,
        )
    }

    pub fn start_with(
        config: WorkerConfig,
        queue: MemoryJobQueue,
        inspector: FakeInspector,
        thumbnailer: FakeThumbnailer,
    ) -> Self {
        let store = Arc::new(RecordingStore::default());
        let queue = Arc::new(queue);
        let inspector = Arc::new(inspector);
        let thumbnailer = Arc::new(thumbnailer);

        let pool = spawn_pool(&config, &store, &queue, &inspector, &thumbnailer);
        let service = MediaService::new(store.clone(), queue.clone());

        Self {
            store,
            queue,
            inspector,
            thumbnailer,
            service,
            pool,
        }
    }

    /// Start another pool over the same store, queue and tools.
    pub fn restart(&self, config: &WorkerConfig) -> WorkerPool {
        spawn_pool(
            config,
            &self.store,
            &self.queue,
            &self.inspector,
            &self.thumbnailer,
        )
    }

    /// Wait (in simulated time) until no job is ready, delayed or in flight.
    pub async fn settle(&self) {
        settle_queue(&self.queue).await
    }

    pub async fn record(&self, key: &RecordKey) -> Record {
        read_record(&self.store, key).await
    }
}

/// Wait (in simulated time) until no job is ready, delayed or in flight.
pub async fn settle_queue(queue: &MemoryJobQueue) {
    let deadline = Duration::from_secs(24 * 3600);
    tokio::time::timeout(deadline, async {
        while !queue.is_empty().await.expect("queue len") {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .expect("jobs did not settle");
}

pub async fn read_record(store: &RecordingStore, key: &RecordKey) -> Record {
    store
        .get(key)
        .await
        .expect("store read")
        .expect("record exists")
}
