//! Redis adapters: cache, priority queue, refresh sessions.

mod cache;
mod queue;
mod sessions;

pub use cache::RedisCache;
pub use queue::RedisJobQueue;
pub use sessions::RedisRefreshSessionStore;
