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

/// Continuous-refill budget: a caller starts with `capacity` tokens and
/// regains `refill_rate` tokens per second, capped at `capacity`.
///
/// Refill is credited in whole elapsed seconds, floored, so the stored
/// timestamp always reflects the last request rather than the last refill
/// tick.
pub struct TokenBucket {
    capacity: u64,
    refill_rate: f64,
    store: Arc<dyn RateLimitStore>,
    ttl: Duration,
}

impl TokenBucket {
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
                tokens: self.capacity as f64,
                timestamp_ms,
            });

        let elapsed_s = timestamp_ms.saturating_sub(record.timestamp_ms) / 1000;
        let mut tokens =
            (record.tokens + elapsed_s as f64 * self.refill_rate).min(self.capacity as f64);

        let decision = if cost > self.capacity {
            Decision::deny(tokens.floor() as u64, RetryAfter::Never)
        } else if cost as f64 <= tokens {
            tokens -= cost as f64;
            Decision::allow(tokens.floor() as u64)
        } else {
            let wait_s = ((cost as f64 - tokens) / self.refill_rate).ceil();
            Decision::deny(tokens.floor() as u64, RetryAfter::Ms(wait_s as u64 * 1000))
        };

        store_record(
            &*self.store,
            &key,
            &BucketRecord {
                tokens,
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cache::InMemoryStore;

    const T: u64 = 1_700_000_000_000;

    fn bucket(capacity: u64, refill_rate: f64) -> (TokenBucket, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let bucket = TokenBucket::new(
            capacity,
            refill_rate,
            Arc::clone(&store) as Arc<dyn RateLimitStore>,
            Duration::from_secs(86_400),
        )
        .expect("valid parameters");
        (bucket, store)
    }

    async fn stored(store: &InMemoryStore, caller: &str) -> BucketRecord {
        let bytes = store
            .get(&record_key(caller))
            .await
            .expect("get")
            .expect("record present");
        serde_json::from_slice(&bytes).expect("decodes")
    }

    #[tokio::test]
    async fn first_request_charges_a_fresh_bucket() {
        let (bucket, store) = bucket(10, 1.0);
        let decision = bucket.process_request("a", T, 5).await.expect("decision");
        assert_eq!(decision, Decision::allow(5));

        let record = stored(&store, "a").await;
        assert_eq!(record.tokens, 5.0);
        assert_eq!(record.timestamp_ms, T);
    }

    #[tokio::test]
    async fn refill_is_floored_to_whole_seconds() {
        let (bucket, _) = bucket(10, 1.0);
        bucket.process_request("a", T, 10).await.expect("drain");

        // 1999 ms elapsed refills a single token.
        let decision = bucket
            .process_request("a", T + 1_999, 1)
            .await
            .expect("decision");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn refill_never_exceeds_capacity() {
        let (bucket, store) = bucket(10, 5.0);
        bucket.process_request("a", T, 4).await.expect("drain");

        bucket
            .process_request("a", T + 3_600_000, 0)
            .await
            .expect("decision");
        let record = stored(&store, "a").await;
        assert_eq!(record.tokens, 10.0);
    }

    #[tokio::test]
    async fn deny_reports_the_wait_and_still_writes() {
        let (bucket, store) = bucket(10, 2.0);
        bucket.process_request("a", T, 10).await.expect("drain");

        let decision = bucket
            .process_request("a", T + 500, 5)
            .await
            .expect("decision");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        // 5 missing tokens at 2 tokens/s.
        assert_eq!(decision.retry_after, Some(RetryAfter::Ms(3_000)));

        // The record was rewritten with the deny timestamp.
        let record = stored(&store, "a").await;
        assert_eq!(record.timestamp_ms, T + 500);
    }

    #[tokio::test]
    async fn resubmitting_after_the_wait_is_admitted() {
        let (bucket, _) = bucket(10, 3.0);
        bucket.process_request("a", T, 10).await.expect("drain");

        let denied = bucket
            .process_request("a", T + 100, 7)
            .await
            .expect("decision");
        let Some(RetryAfter::Ms(wait)) = denied.retry_after else {
            panic!("expected a finite retry hint");
        };
        let retried = bucket
            .process_request("a", T + 100 + wait, 7)
            .await
            .expect("decision");
        assert!(retried.allowed);
    }

    #[tokio::test]
    async fn cost_above_capacity_is_never_admitted() {
        let (bucket, store) = bucket(10, 1.0);
        let decision = bucket.process_request("a", T, 11).await.expect("decision");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert_eq!(decision.retry_after, Some(RetryAfter::Never));

        // The record is still created so the TTL starts counting.
        let record = stored(&store, "a").await;
        assert_eq!(record.tokens, 10.0);
    }

    #[tokio::test]
    async fn fractional_refill_rates_accrue() {
        let (bucket, _) = bucket(10, 0.5);
        bucket.process_request("a", T, 10).await.expect("drain");

        // After 3 floored seconds only 1.5 tokens are back.
        let denied = bucket
            .process_request("a", T + 3_000, 2)
            .await
            .expect("decision");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 1);

        let allowed = bucket
            .process_request("a", T + 7_000, 2)
            .await
            .expect("decision");
        assert!(allowed.allowed);
    }

    #[tokio::test]
    async fn allowed_tokens_respect_the_refill_envelope() {
        // Over any interval the bucket admits at most
        // capacity + elapsed_seconds * refill_rate tokens.
        let (bucket, _) = bucket(10, 1.0);
        let mut admitted = 0u64;
        let mut ts = T;
        let mut state = 7u64;
        for _ in 0..200 {
            // Deterministic pseudo-random cost and spacing.
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let cost = state % 4;
            let gap = (state >> 7) % 1500;
            ts += gap;
            let decision = bucket.process_request("a", ts, cost).await.expect("decision");
            if decision.allowed {
                admitted += cost;
            }
        }
        let elapsed_s = (ts - T) / 1000;
        assert!(admitted <= 10 + elapsed_s);
    }
}
