//! Storage for per-caller rate limit records.
//!
//! Records are opaque blobs keyed by caller id and written with a TTL, so an
//! idle caller's state ages out on its own. The Redis implementation is the
//! deployment default; the in-memory implementation backs tests and
//! single-instance embeddings.

mod memory;
mod redis;

use std::time::Duration;

pub use memory::InMemoryStore;
pub use redis::RedisStore;

use crate::error::ThrottleError;

/// How long an idle caller's record survives unless overridden: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_millis(86_400_000);

pub(crate) fn record_key(caller_id: &str) -> String {
    format!("throttle:{caller_id}")
}

/// Shared key/value storage for caller records.
///
/// Each decision performs one `get` and one `insert`. Individual commands
/// are expected to be atomic per key; the read-modify-write between them is
/// not, so closely racing updates to the same caller may briefly over- or
/// under-count. An implementation that fuses the round-trips under a
/// scripted transaction tightens that without any change to the algorithms.
#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Fetch the record stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ThrottleError>;

    /// Write `value` under `key`, expiring after `ttl`.
    async fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ThrottleError>;

    /// Drop every record. Administrative use only.
    async fn flush_all(&self) -> Result<(), ThrottleError>;
}
