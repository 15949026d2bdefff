use std::sync::Arc;
use std::time::Duration;

use crate::cache::RateLimitStore;
use crate::cache::record_key;
use crate::error::ThrottleError;
use crate::limits::BucketRecord;
use crate::limits::Decision;
use crate::limits::RetryAfter;
use crate::limits::load_record;
use crate::limits::store_record;

/// Outflow twin of the token bucket: requests pour `cost` tokens into the
/// bucket and the level drains at `refill_rate` tokens per second. A request
/// is admitted while the poured level stays within `capacity`.
///
/// The stored record holds the water level, so a fresh caller starts at
/// zero. Drain is credited in whole elapsed seconds, floored.
pub struct LeakyBucket {
    capacity: u64,
    refill_rate: f64,
    store: Arc<dyn RateLimitStore>,
    ttl: Duration,
}

impl LeakyBucket {
    pub fn new(
        capacity: u64,
        refill_rate: f64,
        store: Arc<dyn RateLimitStore>,
        ttl: Duration,
    ) -> Result<Self, ThrottleError> {
        if capacity == 0 {
            return Err(ThrottleError::ConfigInvalid(
                "capacity must be strictly positive".to_string(),
            ));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(ThrottleError::ConfigInvalid(
                "refill_rate must be a strictly positive number of tokens per second".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            refill_rate,
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
        let record = load_record::<BucketRecord>(&*self.store, &key)
            .await?
            .unwrap_or(BucketRecord {
                tokens: 0.0,
                timestamp_ms,
            });

        let elapsed_s = timestamp_ms.saturating_sub(record.timestamp_ms) / 1000;
        let mut level = (record.tokens - elapsed_s as f64 * self.refill_rate).max(0.0);

        let capacity = self.capacity as f64;
        let decision = if cost > self.capacity {
            Decision::deny((capacity - level).floor() as u64, RetryAfter::Never)
        } else if level + cost as f64 <= capacity {
            level += cost as f64;
            Decision::allow((capacity - level).floor() as u64)
        } else {
            let wait_s = ((level + cost as f64 - capacity) / self.refill_rate).ceil();
            Decision::deny(
                (capacity - level).floor() as u64,
                RetryAfter::Ms(wait_s as u64 * 1000),
            )
        };

        store_record(
            &*self.store,
            &key,
            &BucketRecord {
                tokens: level,
                timestamp_ms,
            },
            self.ttl,
        )
        .await?;
        Ok(decision)
    }

    pub(crate) fn store(&self) -> &dyn RateLimitStore {
        &*self.store
    }
}
