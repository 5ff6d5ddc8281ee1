//! End-to-end tests for the queue → worker → DLQ → retry pipeline, run
//! against in-memory implementations of the store ports.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parley::domain::dlq::{DlqJob, DlqStatus};
use parley::domain::foundation::{AppError, Timestamp};
use parley::domain::job::{job_type, raw_payload, Job};
use parley::ports::{DlqStore, JobQueue, QueueError};
use parley::workers::{
    DlqCapture, DlqRetryConfig, DlqRetryConsumer, JobError, JobHandler, WorkerPool,
    WorkerPoolConfig,
};

// ── In-memory infrastructure ────────────────────────────────────────────

struct MemQueue {
    jobs: Mutex<BTreeMap<(i64, u64), Vec<u8>>>,
    dead: Mutex<Vec<Vec<u8>>>,
    seq: AtomicUsize,
}

impl MemQueue {
    fn new() -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            dead: Mutex::new(Vec::new()),
            seq: AtomicUsize::new(0),
        }
    }

    async fn insert(&self, score: f64, payload: Vec<u8>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) as u64;
        self.jobs.lock().await.insert((score as i64, seq), payload);
    }

    async fn queue_len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    async fn dead_len(&self) -> usize {
        self.dead.lock().await.len()
    }
}

#[async_trait]
impl JobQueue for MemQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        self.insert(job.enqueue_score(), job.to_bytes()?).await;
        Ok(())
    }

    async fn schedule_retry(&self, job: &Job, retry_at: i64) -> Result<(), QueueError> {
        self.insert(job.retry_score(retry_at), job.to_bytes()?).await;
        Ok(())
    }

    async fn requeue(&self, job: &Job) -> Result<(), QueueError> {
        self.insert(job.requeue_score(), job.to_bytes()?).await;
        Ok(())
    }

    async fn pop_lowest(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let mut jobs = self.jobs.lock().await;
        let first = jobs.keys().next().copied();
        Ok(first.and_then(|key| jobs.remove(&key)))
    }

    async fn push_dead_letter(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.dead.lock().await.push(payload);
        Ok(())
    }

    async fn pop_dead_letter(&self, _timeout_secs: u64) -> Result<Option<Vec<u8>>, QueueError> {
        let mut dead = self.dead.lock().await;
        if dead.is_empty() {
            // A zero-length sleep keeps the capture loop from spinning hot
            // in tests.
            drop(dead);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(None)
        } else {
            Ok(Some(dead.remove(0)))
        }
    }

    async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.jobs.lock().await.len() as u64)
    }
}

#[derive(Default)]
struct MemDlqStore {
    entries: Mutex<HashMap<Uuid, DlqJob>>,
}

impl MemDlqStore {
    async fn single_entry(&self) -> Option<DlqJob> {
        let entries = self.entries.lock().await;
        entries.values().next().cloned()
    }
}

#[async_trait]
impl DlqStore for MemDlqStore {
    async fn insert(&self, entry: &DlqJob) -> Result<(), AppError> {
        self.entries.lock().await.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn due_for_retry(
        &self,
        max: u32,
        batch: u32,
        now: Timestamp,
    ) -> Result<Vec<DlqJob>, AppError> {
        let entries = self.entries.lock().await;
        let mut due: Vec<DlqJob> = entries
            .values()
            .filter(|e| {
                matches!(e.status, DlqStatus::Pending | DlqStatus::Failed)
                    && e.retry_count < max
                    && e.next_retry_at.map_or(true, |t| t <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(batch as usize);
        Ok(due)
    }

    async fn mark_processing(&self, id: &Uuid) -> Result<(), AppError> {
        self.entries.lock().await.get_mut(id).unwrap().status = DlqStatus::Processing;
        Ok(())
    }

    async fn mark_completed(&self, id: &Uuid) -> Result<(), AppError> {
        self.entries.lock().await.get_mut(id).unwrap().status = DlqStatus::Completed;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &Uuid,
        retry_count: u32,
        error_msg: &str,
        next_retry_at: Option<Timestamp>,
    ) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id).unwrap();
        entry.status = DlqStatus::Failed;
        entry.retry_count = retry_count;
        entry.error_msg = Some(error_msg.to_string());
        entry.next_retry_at = next_retry_at;
        Ok(())
    }

    async fn mark_invalid_payload(&self, id: &Uuid, msg: &str) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id).unwrap();
        entry.status = DlqStatus::Failed;
        entry.error_msg = Some(msg.to_string());
        entry.retry_count = u32::MAX;
        Ok(())
    }

    async fn mark_permanently_failed(&self, id: &Uuid, msg: &str) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id).unwrap();
        entry.status = DlqStatus::PermanentlyFailed;
        entry.error_msg = Some(msg.to_string());
        Ok(())
    }

    async fn sweep_expired(&self, now: Timestamp) -> Result<u64, AppError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.expire_at > now);
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> Result<HashMap<DlqStatus, u64>, AppError> {
        let entries = self.entries.lock().await;
        let mut stats = HashMap::new();
        for entry in entries.values() {
            *stats.entry(entry.status).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

struct AlwaysFailing {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for AlwaysFailing {
    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(JobError::Transient("downstream is down".to_string()))
    }
}

struct NeverCalled;

#[async_trait]
impl JobHandler for NeverCalled {
    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        panic!("handler must not run during shutdown drain");
    }
}

fn broadcast_job() -> Job {
    Job::new(
        job_type::BROADCAST_PRIVATE_MESSAGE,
        raw_payload(&serde_json::json!({"room_id": "r1", "content": "hi"})).unwrap(),
        2,
        3,
        60,
    )
}

// ── Scenarios ───────────────────────────────────────────────────────────

/// A job whose handler keeps failing exhausts its three in-queue retries,
/// lands in the durable DLQ, accumulates DLQ retries, and finally flips to
/// permanently_failed with no further attempts.
#[tokio::test]
async fn failing_job_travels_the_whole_pipeline() {
    let queue = Arc::new(MemQueue::new());
    let store = Arc::new(MemDlqStore::default());
    let handler = Arc::new(AlwaysFailing {
        calls: AtomicUsize::new(0),
    });
    let root = CancellationToken::new();

    let pool = WorkerPool::new(
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        Arc::clone(&handler) as Arc<dyn JobHandler>,
        WorkerPoolConfig {
            workers: 2,
            channel_capacity: 10,
            producer_tick: Duration::from_millis(5),
            backoff_base_secs: 0, // immediate retries keep the test fast
        },
        &root,
    );
    let capture = DlqCapture::new(
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        Arc::clone(&store) as Arc<dyn DlqStore>,
        &root,
    );

    queue.enqueue(&broadcast_job()).await.unwrap();

    let pool_task = tokio::spawn(pool.run());
    let capture_task = tokio::spawn(capture.run());

    // Stage 1: retries exhaust and the capture consumer persists the entry.
    for _ in 0..500 {
        if store.single_entry().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let entry = store.single_entry().await.unwrap();
    assert_eq!(entry.status, DlqStatus::Pending);
    assert_eq!(entry.original_retry_count, 3);
    // 1 initial attempt + 3 retries.
    assert!(handler.calls.load(Ordering::SeqCst) >= 3);

    root.cancel();
    pool_task.await.unwrap();
    capture_task.await.unwrap();

    // Stage 2: drive the retry consumer to the permanent-failure cap.
    let consumer = DlqRetryConsumer::new(
        Arc::clone(&store) as Arc<dyn DlqStore>,
        Arc::clone(&handler) as Arc<dyn JobHandler>,
        DlqRetryConfig {
            retry_interval: Duration::from_millis(1),
            batch_size: 10,
            max_retry_count: 2,
            backoff_factor: 0.0, // due immediately on every pass
        },
        &CancellationToken::new(),
    );

    consumer.process_batch().await.unwrap();
    let entry = store.single_entry().await.unwrap();
    assert_eq!(entry.status, DlqStatus::Failed);
    assert_eq!(entry.retry_count, 1);

    consumer.process_batch().await.unwrap();
    let entry = store.single_entry().await.unwrap();
    assert_eq!(entry.status, DlqStatus::PermanentlyFailed);

    // No further retries once permanently failed.
    let calls_before = handler.calls.load(Ordering::SeqCst);
    consumer.process_batch().await.unwrap();
    assert_eq!(handler.calls.load(Ordering::SeqCst), calls_before);
}

/// After cancellation the pool requeues what it never ran: queue depth
/// returns to the pre-shutdown count.
#[tokio::test]
async fn shutdown_requeues_undispatched_jobs() {
    let queue = Arc::new(MemQueue::new());
    let root = CancellationToken::new();

    let pool = WorkerPool::new(
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        Arc::new(NeverCalled) as Arc<dyn JobHandler>,
        WorkerPoolConfig {
            workers: 2,
            channel_capacity: 10,
            producer_tick: Duration::from_millis(5),
            backoff_base_secs: 5,
        },
        &root,
    );

    for _ in 0..5 {
        queue.enqueue(&broadcast_job()).await.unwrap();
    }
    assert_eq!(queue.queue_len().await, 5);

    // Cancel before starting: the pool starts, observes cancellation, and
    // drains anything the producer managed to pop back into the queue.
    root.cancel();
    pool.run().await;

    assert_eq!(queue.queue_len().await, 5);
    assert_eq!(queue.dead_len().await, 0);
}

/// Queue ordering: a lower priority band always pops first, and within a
/// band the earlier deadline wins.
#[tokio::test]
async fn queue_orders_by_band_then_time() {
    let queue = Arc::new(MemQueue::new());

    let mut urgent = broadcast_job();
    urgent.priority = 1;
    let mut lazy = broadcast_job();
    lazy.priority = 3;
    let normal = broadcast_job(); // priority 2

    queue.enqueue(&lazy).await.unwrap();
    queue.enqueue(&normal).await.unwrap();
    queue.enqueue(&urgent).await.unwrap();

    let order: Vec<_> = {
        let mut ids = Vec::new();
        while let Some(raw) = queue.pop_lowest().await.unwrap() {
            ids.push(Job::from_bytes(&raw).unwrap().id);
        }
        ids
    };

    assert_eq!(order, vec![urgent.id, normal.id, lazy.id]);
}
