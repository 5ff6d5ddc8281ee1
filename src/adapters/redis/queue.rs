//! Redis sorted-set job queue.
//!
//! One ordered set keyed by the composite score (`priority * 1e10 + time
//! component`); lower scores pop first. The pop is a Lua script so read and
//! remove are indivisible, which is the only concurrency primitive producers
//! and consumers share. Dead letters go to a plain list consumed with BLPOP.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use crate::domain::job::Job;
use crate::ports::{JobQueue, QueueError};

/// Sorted-set key holding live jobs.
const QUEUE_KEY: &str = "priority_queue";

/// List key holding terminally failed jobs awaiting capture.
const DLQ_KEY: &str = "priority_queue_dlq";

/// Pop the lowest-scored member and remove it in the same step.
const POP_LOWEST: &str = r#"
local items = redis.call('ZRANGE', KEYS[1], 0, 0)
if #items == 0 then
  return false
end
redis.call('ZREM', KEYS[1], items[1])
return items[1]
"#;

/// Job queue over Redis.
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    client: redis::Client,
    pop_script: Script,
}

impl RedisJobQueue {
    /// Creates the queue. `client` is kept for blocking dead-letter pops,
    /// which must not stall the shared multiplexed connection.
    pub fn new(conn: MultiplexedConnection, client: redis::Client) -> Self {
        Self {
            conn,
            client,
            pop_script: Script::new(POP_LOWEST),
        }
    }

    async fn zadd(&self, score: f64, payload: Vec<u8>) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(QUEUE_KEY, payload, score)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        self.zadd(job.enqueue_score(), job.to_bytes()?).await
    }

    async fn schedule_retry(&self, job: &Job, retry_at: i64) -> Result<(), QueueError> {
        self.zadd(job.retry_score(retry_at), job.to_bytes()?).await
    }

    async fn requeue(&self, job: &Job) -> Result<(), QueueError> {
        self.zadd(job.requeue_score(), job.to_bytes()?).await
    }

    async fn pop_lowest(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let mut conn = self.conn.clone();
        let popped: Option<Vec<u8>> = self
            .pop_script
            .key(QUEUE_KEY)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(popped)
    }

    async fn push_dead_letter(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(DLQ_KEY, payload)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }

    async fn pop_dead_letter(&self, timeout_secs: u64) -> Result<Option<Vec<u8>>, QueueError> {
        // BLPOP ties up its connection for the full timeout; use a dedicated
        // one rather than the shared multiplexed handle.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let popped: Option<(String, Vec<u8>)> = conn
            .blpop(DLQ_KEY, timeout_secs as f64)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        Ok(popped.map(|(_, payload)| payload))
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        conn.zcard(QUEUE_KEY)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue").finish_non_exhaustive()
    }
}
