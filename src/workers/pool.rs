//! Worker pool: producer tick, bounded channel, retrying workers.
//!
//! One producer atomically pops due jobs off the queue and feeds N workers
//! over a bounded channel of serialized jobs. Failures re-enter the queue
//! with exponential backoff until the retry budget or the job's deadline
//! runs out; terminal failures go to the dead-letter list. On shutdown, the
//! producer requeues anything popped but not yet handed over, workers finish
//! their current job, and whatever is still sitting in the channel is
//! drained back to the queue at its original score.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::Timestamp;
use crate::domain::job::Job;
use crate::ports::JobQueue;

use super::alert::DeadLetterAlerts;
use super::handlers::{JobError, JobHandler};

/// Pool sizing and timing.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of the producer→worker channel.
    pub channel_capacity: usize,
    /// Producer poll interval.
    pub producer_tick: Duration,
    /// Base of the exponential backoff, in seconds.
    pub backoff_base_secs: i64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            channel_capacity: 100,
            producer_tick: Duration::from_millis(100),
            backoff_base_secs: 5,
        }
    }
}

/// Producer plus N workers over one bounded channel.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    alerts: DeadLetterAlerts,
    config: WorkerPoolConfig,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: WorkerPoolConfig,
        root: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            handler,
            alerts: DeadLetterAlerts::new(),
            config,
            cancel: root.child_token(),
        })
    }

    /// Runs producer and workers until root cancellation, then drains the
    /// channel back to the queue.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(workers = self.config.workers, "worker pool starting");

        let (tx, rx) = mpsc::channel::<Vec<u8>>(self.config.channel_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut tasks = JoinSet::new();

        {
            let pool = Arc::clone(&self);
            tasks.spawn(async move { pool.producer_loop(tx).await });
        }

        for worker_id in 0..self.config.workers {
            let pool = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            tasks.spawn(async move { pool.worker_loop(worker_id, rx).await });
        }

        while tasks.join_next().await.is_some() {}

        // Producer and workers are gone; requeue whatever never ran.
        self.drain_channel(rx).await;

        tracing::info!("worker pool stopped");
    }

    async fn producer_loop(&self, tx: mpsc::Sender<Vec<u8>>) {
        let mut ticker = tokio::time::interval(self.config.producer_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("producer stopping");
                    return;
                }

                _ = ticker.tick() => {
                    let raw = match self.queue.pop_lowest().await {
                        Ok(Some(raw)) => raw,
                        Ok(None) => continue,
                        Err(err) => {
                            tracing::error!(error = %err, "producer: pop failed");
                            continue;
                        }
                    };

                    let job = match Job::from_bytes(&raw) {
                        Ok(job) => job,
                        Err(err) => {
                            // Unparseable off the wire: dead-letter the raw
                            // bytes rather than losing them.
                            tracing::warn!(error = %err, "producer: unparseable job");
                            self.push_dead_letter_raw(raw).await;
                            continue;
                        }
                    };

                    if job.is_expired_at(Timestamp::now().as_unix_secs()) {
                        tracing::warn!(job_id = %job.id, "producer: job expired before dispatch");
                        self.dead_letter(job).await;
                        continue;
                    }

                    // In-flight window between pop and hand-off: if shutdown
                    // hit meanwhile, the job goes back at its original score.
                    if self.cancel.is_cancelled() {
                        self.requeue(&job).await;
                        return;
                    }

                    if tx.try_send(raw).is_err() {
                        // Channel full (or workers gone): back to the queue
                        // instead of blocking the producer.
                        self.requeue(&job).await;
                    }
                }
            }
        }
    }

    async fn worker_loop(&self, worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>) {
        tracing::info!(worker_id, "worker started");

        loop {
            let raw = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::info!(worker_id, "worker stopping");
                        return;
                    }
                    maybe = rx.recv() => match maybe {
                        Some(raw) => raw,
                        None => return,
                    },
                }
            };

            let job = match Job::from_bytes(&raw) {
                Ok(job) => job,
                Err(err) => {
                    tracing::warn!(worker_id, error = %err, "worker: unparseable job");
                    self.push_dead_letter_raw(raw).await;
                    continue;
                }
            };

            if let Err(err) = self.handler.handle(&job).await {
                self.handle_failure(job, err).await;
            } else {
                tracing::debug!(worker_id, job_id = %job.id, job_type = %job.job_type, "job completed");
            }
        }
    }

    /// Retry/backoff/dead-letter decision for a failed job.
    async fn handle_failure(&self, mut job: Job, err: JobError) {
        let message = err.to_string();

        if matches!(err, JobError::Fatal(_)) {
            job.error_msg = Some(message);
            tracing::error!(job_id = %job.id, "job failed fatally, dead-lettering");
            self.dead_letter(job).await;
            return;
        }

        job.retry += 1;
        job.error_msg = Some(message);

        let now = Timestamp::now().as_unix_secs();
        if job.retries_exhausted() || job.is_expired_at(now) {
            tracing::error!(
                job_id = %job.id,
                retry = job.retry,
                "job moved to dead-letter list"
            );
            self.alerts.alert(&job);
            self.dead_letter(job).await;
            return;
        }

        // backoff = base * 2^(retry - 1)
        let backoff = self.config.backoff_base_secs << (job.retry - 1);
        let retry_at = now + backoff;

        tracing::warn!(
            job_id = %job.id,
            retry = job.retry,
            max_retry = job.max_retry,
            backoff_secs = backoff,
            "retrying job with backoff"
        );

        if let Err(err) = self.queue.schedule_retry(&job, retry_at).await {
            tracing::error!(job_id = %job.id, error = %err, "retry re-insert failed, dead-lettering");
            self.dead_letter(job).await;
        }
    }

    async fn dead_letter(&self, job: Job) {
        match job.to_bytes() {
            Ok(bytes) => self.push_dead_letter_raw(bytes).await,
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "failed to serialize dead job");
            }
        }
    }

    async fn push_dead_letter_raw(&self, raw: Vec<u8>) {
        if let Err(err) = self.queue.push_dead_letter(raw).await {
            tracing::error!(error = %err, "failed to push dead letter");
        }
    }

    async fn requeue(&self, job: &Job) {
        if let Err(err) = self.queue.requeue(job).await {
            tracing::error!(job_id = %job.id, error = %err, "shutdown requeue failed");
        }
    }

    /// Requeue jobs still sitting in the channel after shutdown.
    async fn drain_channel(&self, rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>) {
        let mut rx = rx.lock().await;
        let mut drained = 0usize;

        while let Ok(raw) = rx.try_recv() {
            match Job::from_bytes(&raw) {
                Ok(job) => {
                    self.requeue(&job).await;
                    drained += 1;
                }
                Err(_) => self.push_dead_letter_raw(raw).await,
            }
        }

        if drained > 0 {
            tracing::info!(drained, "requeued in-channel jobs on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{job_type, raw_payload};
    use crate::ports::QueueError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory queue with real score ordering.
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
            self.jobs
                .lock()
                .await
                .insert((score as i64, seq), payload);
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

        async fn pop_dead_letter(
            &self,
            _timeout_secs: u64,
        ) -> Result<Option<Vec<u8>>, QueueError> {
            let mut dead = self.dead.lock().await;
            if dead.is_empty() {
                Ok(None)
            } else {
                Ok(Some(dead.remove(0)))
            }
        }

        async fn len(&self) -> Result<u64, QueueError> {
            Ok(self.jobs.lock().await.len() as u64)
        }
    }

    /// Handler that fails the first `failures` calls, then succeeds.
    struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyHandler {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(JobError::Transient("downstream hiccup".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn job(max_retry: u32) -> Job {
        Job::new(
            job_type::BROADCAST_PRIVATE_MESSAGE,
            raw_payload(&serde_json::json!({"k": "v"})).unwrap(),
            2,
            max_retry,
            60,
        )
    }

    fn pool(
        queue: Arc<MemQueue>,
        handler: Arc<dyn JobHandler>,
        root: &CancellationToken,
    ) -> Arc<WorkerPool> {
        WorkerPool::new(
            queue,
            handler,
            WorkerPoolConfig {
                workers: 2,
                channel_capacity: 10,
                producer_tick: Duration::from_millis(5),
                backoff_base_secs: 5,
            },
            root,
        )
    }

    #[tokio::test]
    async fn transient_failure_reschedules_with_backoff() {
        let queue = Arc::new(MemQueue::new());
        let handler = Arc::new(FlakyHandler::new(1));
        let root = CancellationToken::new();
        let pool = pool(Arc::clone(&queue), Arc::clone(&handler) as _, &root);

        let j = job(3);
        queue.enqueue(&j).await.unwrap();

        pool.handle_failure(
            {
                let mut failed = j.clone();
                failed.retry = 0;
                // Simulate the worker having popped it already.
                queue.pop_lowest().await.unwrap();
                failed
            },
            JobError::Transient("boom".to_string()),
        )
        .await;

        // One retry entry, nothing dead-lettered.
        assert_eq!(queue.queue_len().await, 1);
        assert_eq!(queue.dead_len().await, 0);

        let raw = queue.pop_lowest().await.unwrap().unwrap();
        let retried = Job::from_bytes(&raw).unwrap();
        assert_eq!(retried.retry, 1);
        assert_eq!(retried.error_msg.as_deref(), Some("transient: boom"));
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered() {
        let queue = Arc::new(MemQueue::new());
        let handler = Arc::new(FlakyHandler::new(usize::MAX));
        let root = CancellationToken::new();
        let pool = pool(Arc::clone(&queue), handler as _, &root);

        let mut j = job(3);
        j.retry = 2; // next failure is the third and last attempt
        pool.handle_failure(j, JobError::Transient("boom".to_string()))
            .await;

        assert_eq!(queue.queue_len().await, 0);
        assert_eq!(queue.dead_len().await, 1);

        let dead = Job::from_bytes(&queue.dead.lock().await[0]).unwrap();
        assert_eq!(dead.retry, 3);
        assert!(dead.retry <= dead.max_retry);
    }

    #[tokio::test]
    async fn fatal_failure_skips_retry() {
        let queue = Arc::new(MemQueue::new());
        let handler = Arc::new(FlakyHandler::new(0));
        let root = CancellationToken::new();
        let pool = pool(Arc::clone(&queue), handler as _, &root);

        pool.handle_failure(job(3), JobError::Fatal("invalid payload".to_string()))
            .await;

        assert_eq!(queue.queue_len().await, 0);
        assert_eq!(queue.dead_len().await, 1);
    }

    #[tokio::test]
    async fn pool_processes_jobs_end_to_end() {
        let queue = Arc::new(MemQueue::new());
        let handler = Arc::new(FlakyHandler::new(0));
        let root = CancellationToken::new();
        let pool = pool(Arc::clone(&queue), Arc::clone(&handler) as _, &root);

        for _ in 0..5 {
            queue.enqueue(&job(3)).await.unwrap();
        }

        let run = tokio::spawn(Arc::clone(&pool).run());

        // Let the pool drain the queue.
        for _ in 0..100 {
            if handler.call_count() >= 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        root.cancel();
        run.await.unwrap();

        assert_eq!(handler.call_count(), 5);
        assert_eq!(queue.queue_len().await, 0);
        assert_eq!(queue.dead_len().await, 0);
    }

    #[tokio::test]
    async fn expired_job_goes_straight_to_dead_letters() {
        let queue = Arc::new(MemQueue::new());
        let handler = Arc::new(FlakyHandler::new(0));
        let root = CancellationToken::new();
        let pool = pool(Arc::clone(&queue), Arc::clone(&handler) as _, &root);

        let mut expired = job(3);
        expired.expire_at = Timestamp::now().as_unix_secs() - 10;
        queue.enqueue(&expired).await.unwrap();

        let run = tokio::spawn(Arc::clone(&pool).run());

        for _ in 0..100 {
            if queue.dead_len().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        root.cancel();
        run.await.unwrap();

        // The handler never saw it.
        assert_eq!(handler.call_count(), 0);
        assert_eq!(queue.dead_len().await, 1);
    }

    #[tokio::test]
    async fn retry_count_never_exceeds_max() {
        let queue = Arc::new(MemQueue::new());
        let handler = Arc::new(FlakyHandler::new(usize::MAX));
        let root = CancellationToken::new();
        let pool = pool(Arc::clone(&queue), handler as _, &root);

        let mut j = job(3);
        for _ in 0..3 {
            pool.handle_failure(j.clone(), JobError::Transient("boom".to_string()))
                .await;
            // Pick up the rescheduled copy, if any.
            if let Some(raw) = queue.pop_lowest().await.unwrap() {
                j = Job::from_bytes(&raw).unwrap();
            }
        }

        let dead = queue.dead.lock().await;
        let final_job = Job::from_bytes(dead.last().unwrap()).unwrap();
        assert!(final_job.retry <= final_job.max_retry);
    }
}
