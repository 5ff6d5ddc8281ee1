//! Queue consumers: worker pool, dead-letter capture, retry consumer.
//!
//! ```text
//! C2 queue ──▶ producer ──▶ bounded channel ──▶ workers ──▶ handlers ──▶ Hub
//!                 ▲                                 │ retries exhausted
//!                 │ backoff re-insert               ▼
//!                 └──────────────────────── dead-letter list ──▶ capture ──▶ DLQ store
//!                                                                              │
//!                                                    retry consumer ◀──────────┘
//! ```

mod alert;
mod dlq_consumer;
mod dlq_retry;
mod handlers;
mod pool;

pub use alert::DeadLetterAlerts;
pub use dlq_consumer::DlqCapture;
pub use dlq_retry::{DlqRetryConfig, DlqRetryConsumer};
pub use handlers::{BroadcastMessagePayload, JobError, JobHandler, JobRouter, OtpPayload};
pub use pool::{WorkerPool, WorkerPoolConfig};
