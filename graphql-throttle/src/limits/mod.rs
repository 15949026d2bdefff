//! Rate limiting algorithms.
//!
//! Five interchangeable algorithms share one contract: given a caller id, a
//! request timestamp and a token cost, decide whether the request is
//! admitted and how much budget remains. Every decision, allowed or not,
//! rewrites the caller's record so drift accrues and the TTL refreshes.

mod fixed_window;
mod leaky_bucket;
mod sliding_window_counter;
mod sliding_window_log;
mod token_bucket;

use std::sync::Arc;
use std::time::Duration;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
pub use sliding_window_counter::SlidingWindowCounter;
pub use sliding_window_log::SlidingWindowLog;
pub use token_bucket::TokenBucket;

use crate::cache::RateLimitStore;
use crate::configuration::AlgorithmConfig;
use crate::error::ThrottleError;

/// The verdict for one request.
///
/// `remaining` is the post-decision available capacity, never negative.
/// `retry_after` is present exactly when the request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    #[serde(rename = "retry_after_ms", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<RetryAfter>,
}

impl Decision {
    pub(crate) fn allow(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    pub(crate) fn deny(remaining: u64, retry_after: RetryAfter) -> Self {
        Self {
            allowed: false,
            remaining,
            retry_after: Some(retry_after),
        }
    }
}

/// How long a denied caller must wait before the same request can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAfter {
    /// Milliseconds until the request fits.
    Ms(u64),
    /// The request can never be admitted: its cost exceeds capacity.
    Never,
}

impl Serialize for RetryAfter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RetryAfter::Ms(ms) => serializer.serialize_u64(*ms),
            RetryAfter::Never => serializer.serialize_str("∞"),
        }
    }
}

/// Bucket state shared by the token and leaky bucket algorithms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BucketRecord {
    pub(crate) tokens: f64,
    pub(crate) timestamp_ms: u64,
}

/// Window state shared by the fixed-window and sliding-window-counter
/// algorithms. `previous_tokens` is set once a caller has completed a
/// window; the fixed-window algorithm never sets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WindowRecord {
    pub(crate) current_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) previous_tokens: Option<u64>,
    pub(crate) fixed_window_start_ms: u64,
}

/// One admitted request in the sliding-window log, ordered oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LogEntry {
    pub(crate) timestamp_ms: u64,
    pub(crate) tokens: u64,
}

/// Fetch and decode the record under `key`. A blob that fails to decode is
/// logged and dropped, as if it had expired, so one corrupt record heals on
/// the next write.
pub(crate) async fn load_record<T: serde::de::DeserializeOwned>(
    store: &dyn RateLimitStore,
    key: &str,
) -> Result<Option<T>, ThrottleError> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Ok(Some(record)),
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding undecodable rate limit record");
            Ok(None)
        }
    }
}

pub(crate) async fn store_record<T: Serialize>(
    store: &dyn RateLimitStore,
    key: &str,
    record: &T,
    ttl: Duration,
) -> Result<(), ThrottleError> {
    // A record that cannot be encoded cannot be written: from the caller's
    // perspective that write failed, like any other storage failure.
    let bytes = serde_json::to_vec(record).map_err(|err| {
        ThrottleError::StorageUnavailable(format!("failed to encode record for {key}: {err}"))
    })?;
    store.insert(key, bytes, ttl).await
}

/// A rate limiting algorithm bound to a store.
///
/// Dispatch is a closed match over the five variants; each holds its own
/// parameters and shares nothing beyond the store handle.
pub enum Limiter {
    TokenBucket(TokenBucket),
    LeakyBucket(LeakyBucket),
    FixedWindow(FixedWindow),
    SlidingWindowLog(SlidingWindowLog),
    SlidingWindowCounter(SlidingWindowCounter),
}

impl Limiter {
    pub fn new(
        config: &AlgorithmConfig,
        store: Arc<dyn RateLimitStore>,
        ttl: Duration,
    ) -> Result<Self, ThrottleError> {
        config.validate()?;
        Ok(match *config {
            AlgorithmConfig::TokenBucket {
                capacity,
                refill_rate,
            } => Limiter::TokenBucket(TokenBucket::new(capacity, refill_rate, store, ttl)?),
            AlgorithmConfig::LeakyBucket {
                capacity,
                refill_rate,
            } => Limiter::LeakyBucket(LeakyBucket::new(capacity, refill_rate, store, ttl)?),
            AlgorithmConfig::FixedWindow { capacity, window } => {
                Limiter::FixedWindow(FixedWindow::new(capacity, window, store, ttl)?)
            }
            AlgorithmConfig::SlidingWindowLog { capacity, window } => {
                Limiter::SlidingWindowLog(SlidingWindowLog::new(capacity, window, store, ttl)?)
            }
            AlgorithmConfig::SlidingWindowCounter { capacity, window } => {
                Limiter::SlidingWindowCounter(SlidingWindowCounter::new(
                    capacity, window, store, ttl,
                )?)
            }
        })
    }

    /// Charge `cost` tokens against `caller_id`'s budget at `timestamp_ms`.
    pub async fn process_request(
        &self,
        caller_id: &str,
        timestamp_ms: u64,
        cost: u64,
    ) -> Result<Decision, ThrottleError> {
        match self {
            Limiter::TokenBucket(limiter) => {
                limiter.process_request(caller_id, timestamp_ms, cost).await
            }
            Limiter::LeakyBucket(limiter) => {
                limiter.process_request(caller_id, timestamp_ms, cost).await
            }
            Limiter::FixedWindow(limiter) => {
                limiter.process_request(caller_id, timestamp_ms, cost).await
            }
            Limiter::SlidingWindowLog(limiter) => {
                limiter.process_request(caller_id, timestamp_ms, cost).await
            }
            Limiter::SlidingWindowCounter(limiter) => {
                limiter.process_request(caller_id, timestamp_ms, cost).await
            }
        }
    }

    /// Clear the entire keyspace. For tests and emergency operator use;
    /// never called on the request path.
    pub async fn reset(&self) -> Result<(), ThrottleError> {
        self.store().flush_all().await
    }

    fn store(&self) -> &dyn RateLimitStore {
        match self {
            Limiter::TokenBucket(limiter) => limiter.store(),
            Limiter::LeakyBucket(limiter) => limiter.store(),
            Limiter::FixedWindow(limiter) => limiter.store(),
            Limiter::SlidingWindowLog(limiter) => limiter.store(),
            Limiter::SlidingWindowCounter(limiter) => limiter.store(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::cache::InMemoryStore;

    #[test]
    fn decisions_serialize_to_the_wire_shape() {
        let allowed = serde_json::to_value(Decision::allow(5)).expect("serializes");
        assert_eq!(
            allowed,
            serde_json::json!({ "allowed": true, "remaining": 5 })
        );

        let denied = serde_json::to_value(Decision::deny(1, RetryAfter::Ms(750))).expect("serializes");
        assert_eq!(
            denied,
            serde_json::json!({ "allowed": false, "remaining": 1, "retry_after_ms": 750 })
        );

        let hopeless =
            serde_json::to_value(Decision::deny(10, RetryAfter::Never)).expect("serializes");
        assert_eq!(
            hopeless,
            serde_json::json!({ "allowed": false, "remaining": 10, "retry_after_ms": "∞" })
        );
    }

    #[tokio::test]
    async fn reset_clears_every_caller_and_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = Limiter::new(
            &AlgorithmConfig::TokenBucket {
                capacity: 10,
                refill_rate: 1.0,
            },
            store,
            Duration::from_secs(60),
        )
        .expect("valid configuration");

        limiter.process_request("a", 1_000, 4).await.expect("charge");
        limiter.process_request("b", 1_000, 4).await.expect("charge");
        limiter.reset().await.expect("reset");

        // Budgets are full again after the wipe.
        let decision = limiter.process_request("a", 1_000, 10).await.expect("charge");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);

        limiter.reset().await.expect("reset twice");
        let decision = limiter.process_request("b", 1_000, 10).await.expect("charge");
        assert!(decision.allowed);
    }

    #[rstest]
    #[case::zero_capacity(AlgorithmConfig::TokenBucket { capacity: 0, refill_rate: 1.0 })]
    #[case::zero_refill(AlgorithmConfig::LeakyBucket { capacity: 10, refill_rate: 0.0 })]
    #[case::negative_refill(AlgorithmConfig::TokenBucket { capacity: 10, refill_rate: -1.0 })]
    #[case::zero_window(AlgorithmConfig::FixedWindow { capacity: 10, window: Duration::ZERO })]
    #[case::zero_log_window(AlgorithmConfig::SlidingWindowLog { capacity: 10, window: Duration::ZERO })]
    fn invalid_configurations_are_rejected(#[case] config: AlgorithmConfig) {
        let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryStore::new());
        let result = Limiter::new(&config, store, Duration::from_secs(1));
        assert!(matches!(result, Err(ThrottleError::ConfigInvalid(_))));
    }

    #[tokio::test]
    async fn corrupt_records_heal_on_the_next_write() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(
                "throttle:a",
                b"not json".to_vec(),
                Duration::from_secs(60),
            )
            .await
            .expect("insert");

        let limiter = Limiter::new(
            &AlgorithmConfig::TokenBucket {
                capacity: 10,
                refill_rate: 1.0,
            },
            Arc::clone(&store) as Arc<dyn RateLimitStore>,
            Duration::from_secs(60),
        )
        .expect("valid configuration");

        // The corrupt blob reads as an absent record, so the first request
        // sees a full bucket and rewrites clean state.
        let decision = limiter.process_request("a", 1_000, 4).await.expect("charge");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 6);

        let decision = limiter.process_request("a", 1_000, 6).await.expect("charge");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }
}
