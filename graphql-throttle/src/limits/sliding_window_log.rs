use std::sync::Arc;
use std::time::Duration;

use crate::cache::RateLimitStore;
use crate::cache::record_key;
use crate::error::ThrottleError;
use crate::limits::Decision;
use crate::limits::LogEntry;
use crate::limits::RetryAfter;
use crate::limits::load_record;
use crate::limits::store_record;

/// Exact sliding window: every admitted request is logged with its
/// timestamp and cost, and a request fits when the logged total inside the
/// trailing window leaves room for it.
///
/// Entries expire strictly: a timestamp at or before `now - window` is out.
/// The log stays non-decreasing in timestamp because entries are only ever
/// appended at the current time.
pub struct SlidingWindowLog {
    capacity: u64,
    window_ms: u64,
    store: Arc<dyn RateLimitStore>,
    ttl: Duration,
}

impl SlidingWindowLog {
    pub fn new(
        capacity: u64,
        window: Duration,
        store: Arc<dyn RateLimitStore>,
        ttl: Duration,
    ) -> Result<Self, ThrottleError> {
        if capacity == 0 {
            return Err(ThrottleError::ConfigInvalid(
                "capacity must be strictly positive".to_string(),
            ));
        }
        let window_ms = window.as_millis().min(u64::MAX as u128) as u64;
        if window_ms == 0 {
            return Err(ThrottleError::ConfigInvalid(
                "window must be at least one millisecond".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            window_ms,
            store,
            ttl,
        })
    }

    pub async fn process_request(
        &self,
        caller_id: &str,
        timestamp_ms: u64,
        cost: u64,
    ) -> Result<Decision, ThrottleError> {
        let key = record_key(caller_id);
        let mut log = load_record::<Vec<LogEntry>>(&*self.store, &key)
            .await?
            .unwrap_or_default();

        let cutoff = timestamp_ms.saturating_sub(self.window_ms);
        log.retain(|entry| entry.timestamp_ms > cutoff);
        let active = log
            .iter()
            .fold(0u64, |total, entry| total.saturating_add(entry.tokens));

        let decision = if cost > self.capacity {
            Decision::deny(self.capacity.saturating_sub(active), RetryAfter::Never)
        } else if active.saturating_add(cost) <= self.capacity {
            // Zero-cost requests are admitted without cluttering the log.
            if cost > 0 {
                log.push(LogEntry {
                    timestamp_ms,
                    tokens: cost,
                });
            }
            Decision::allow(self.capacity - active - cost)
        } else {
            Decision::deny(
                self.capacity.saturating_sub(active),
                self.retry_after(&log, timestamp_ms, cost),
            )
        };

        store_record(&*self.store, &key, &log, self.ttl).await?;
        Ok(decision)
    }

    /// Time until enough of the oldest logged entries expire to make room.
    ///
    /// Walking from the newest entry backward, keep the largest suffix that
    /// still fits alongside `cost`; the entry just older than that suffix is
    /// the last one that has to age out, and everything older than it
    /// expires no later than it does.
    fn retry_after(&self, log: &[LogEntry], timestamp_ms: u64, cost: u64) -> RetryAfter {
        let mut kept = 0u64;
        for entry in log.iter().rev() {
            if kept.saturating_add(entry.tokens).saturating_add(cost) > self.capacity {
                return RetryAfter::Ms((self.window_ms + entry.timestamp_ms) - timestamp_ms);
            }
            kept += entry.tokens;
        }
        // Unreachable on the deny path: the full log did not fit, so some
        // entry must breach the capacity during the walk.
        RetryAfter::Ms(self.window_ms)
    }

    pub(crate) fn store(&self) -> &dyn RateLimitStore {
        &*self.store
    }
}
