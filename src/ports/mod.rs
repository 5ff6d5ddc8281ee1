//! Ports - interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between the
//! domain and the outside world. Adapters implement these ports.
//!
//! ## Store ports
//!
//! - `RoomStore` - relational rooms, members, find-or-create
//! - `UserStore` - relational accounts
//! - `MessageStore` - ordered message log (document side of the split)
//! - `DlqStore` - dead-lettered job documents
//!
//! ## Infrastructure ports
//!
//! - `Cache` - byte-level KV with TTL; typed JSON helpers live alongside
//! - `JobQueue` - score-ordered queue with atomic pop and dead-letter list
//! - `RefreshSessionStore` - refresh-token session records
//! - `Mailer` - outbound mail dispatch

mod cache;
mod dlq_store;
mod job_queue;
mod mailer;
mod message_store;
mod room_store;
mod session_store;
mod user_store;

pub use cache::{delete_cached, get_cached, set_cached, Cache, CacheError};
pub use dlq_store::DlqStore;
pub use job_queue::{JobQueue, QueueError};
pub use mailer::{Mailer, OutboundMail};
pub use message_store::{MessageEdit, MessagePage, MessageStore};
pub use room_store::{MembershipUpdate, RoomStore};
pub use session_store::RefreshSessionStore;
pub use user_store::UserStore;
