use std::sync::Arc;
use std::time::Duration;

use crate::cache::RateLimitStore;
use crate::cache::record_key;
use crate::error::ThrottleError;
use crate::limits::Decision;
use crate::limits::RetryAfter;
use crate::limits::WindowRecord;
use crate::limits::load_record;
use crate::limits::store_record;

/// Two-window interpolation: the previous window's total bleeds out
/// linearly as the current window fills, approximating an exact sliding
/// window with constant-size state.
///
/// With `p` the fraction of the previous window still overlapping the
/// trailing window, the effective usage is
/// `current + floor(previous * p)`; a request fits while that plus its cost
/// stays within capacity. All arithmetic is in milliseconds.
pub struct SlidingWindowCounter {
    capacity: u64,
    window_ms: u64,
    store: Arc<dyn RateLimitStore>,
    ttl: Duration,
}

impl SlidingWindowCounter {
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
        let Some(mut record) = load_record::<WindowRecord>(&*self.store, &key).await? else {
            // First sight of this caller: open a window at the request.
            let (decision, current_tokens) = if cost <= self.capacity {
                (Decision::allow(self.capacity - cost), cost)
            } else {
                (Decision::deny(self.capacity, RetryAfter::Never), 0)
            };
            let record = WindowRecord {
                current_tokens,
                previous_tokens: None,
                fixed_window_start_ms: timestamp_ms,
            };
            store_record(&*self.store, &key, &record, self.ttl).await?;
            return Ok(decision);
        };

        let window_end = record.fixed_window_start_ms.saturating_add(self.window_ms);
        if timestamp_ms >= window_end.saturating_add(self.window_ms) {
            // Idle for more than a full window: nothing bleeds over.
            record.previous_tokens = Some(0);
            record.current_tokens = 0;
            record.fixed_window_start_ms = timestamp_ms;
        } else if timestamp_ms >= window_end {
            record.previous_tokens = Some(record.current_tokens);
            record.current_tokens = 0;
            record.fixed_window_start_ms += self.window_ms;
        }

        let previous = record.previous_tokens.unwrap_or(0);
        let elapsed = timestamp_ms.saturating_sub(record.fixed_window_start_ms);
        let overlap = ((self.window_ms.saturating_sub(elapsed)) as f64 / self.window_ms as f64)
            .clamp(0.0, 1.0);
        let rolling = (previous as f64 * overlap).floor() as u64;
        let effective = record.current_tokens.saturating_add(rolling);

        let decision = if cost > self.capacity {
            Decision::deny(self.capacity.saturating_sub(effective), RetryAfter::Never)
        } else if effective.saturating_add(cost) <= self.capacity {
            record.current_tokens += cost;
            Decision::allow(self.capacity - effective - cost)
        } else {
            let wait = self.wait_for_room(record.current_tokens, previous, rolling, overlap, cost);
            Decision::deny(
                self.capacity.saturating_sub(effective),
                RetryAfter::Ms(wait),
            )
        };

        store_record(&*self.store, &key, &record, self.ttl).await?;
        Ok(decision)
    }

    /// Milliseconds until the shortfall bleeds out: the previous window's
    /// share decays while the current window's own spending only clears at
    /// the next rotation, so the two waits are estimated separately and
    /// summed.
    fn wait_for_room(
        &self,
        current: u64,
        previous: u64,
        rolling: u64,
        overlap: f64,
        cost: u64,
    ) -> u64 {
        let shortfall = current
            .saturating_add(rolling)
            .saturating_add(cost)
            .saturating_sub(self.capacity);
        let from_previous = shortfall.min(rolling);
        let from_current = shortfall - from_previous;

        let overlap_ms = self.window_ms as f64 * overlap;
        let wait_previous = if rolling > from_previous {
            overlap_ms * ((previous - from_previous) as f64 / rolling as f64)
        } else {
            overlap_ms
        };
        // from_current > 0 implies current > 0: cost alone never exceeds
        // capacity on this path.
        let wait_current = if from_current > 0 {
            self.window_ms as f64 * (from_current as f64 / current as f64)
        } else {
            0.0
        };
        (wait_previous + wait_current).ceil() as u64
    }

    pub(crate) fn store(&self) -> &dyn RateLimitStore {
        &*self.store
    }
}
