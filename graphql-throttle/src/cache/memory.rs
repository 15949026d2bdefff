use std::time::Duration;
use std::time::Instant;

use ahash::HashMap;
use parking_lot::Mutex;

use super::RateLimitStore;
use crate::error::ThrottleError;

/// Process-local store with the same observable behavior as the Redis
/// backend. Entries expire lazily on read.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ThrottleError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ThrottleError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), ThrottleError> {
        self.entries.lock().clear();
        Ok(())
    }
}
