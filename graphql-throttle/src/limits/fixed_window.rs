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

/// Coarse window counter: tokens accumulate inside a window aligned to the
/// caller's first request, and the count resets when the window turns over.
pub struct FixedWindow {
    capacity: u64,
    window_ms: u64,
    store: Arc<dyn RateLimitStore>,
    ttl: Duration,
}

impl FixedWindow {
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
        let mut record = load_record::<WindowRecord>(&*self.store, &key)
            .await?
            .unwrap_or(WindowRecord {
                current_tokens: 0,
                previous_tokens: None,
                fixed_window_start_ms: timestamp_ms,
            });

        // Advance by however many whole windows have elapsed; the count only
        // survives within a single window.
        if timestamp_ms >= record.fixed_window_start_ms.saturating_add(self.window_ms) {
            let windows = (timestamp_ms - record.fixed_window_start_ms) / self.window_ms;
            record.fixed_window_start_ms += windows * self.window_ms;
            record.current_tokens = 0;
        }

        let decision = if cost > self.capacity {
            Decision::deny(
                self.capacity.saturating_sub(record.current_tokens),
                RetryAfter::Never,
            )
        } else if record.current_tokens.saturating_add(cost) <= self.capacity {
            record.current_tokens += cost;
            Decision::allow(self.capacity - record.current_tokens)
        } else {
            let window_end = record.fixed_window_start_ms.saturating_add(self.window_ms);
            Decision::deny(
                self.capacity.saturating_sub(record.current_tokens),
                RetryAfter::Ms(window_end - timestamp_ms),
            )
        };

        store_record(&*self.store, &key, &record, self.ttl).await?;
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

    fn window(capacity: u64, window_ms: u64) -> (FixedWindow, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let window = FixedWindow::new(
            capacity,
            Duration::from_millis(window_ms),
            Arc::clone(&store) as Arc<dyn RateLimitStore>,
            Duration::from_secs(86_400),
        )
        .expect("valid parameters");
        (window, store)
    }

    async fn stored(store: &InMemoryStore, caller: &str) -> WindowRecord {
        let bytes = store
            .get(&record_key(caller))
            .await
            .expect("get")
            .expect("record present");
        serde_json::from_slice(&bytes).expect("decodes")
    }

    #[tokio::test]
    async fn counts_accumulate_within_a_window() {
        let (window, store) = window(10, 6_000);
        assert_eq!(
            window.process_request("a", T, 4).await.expect("decision"),
            Decision::allow(6)
        );
        assert_eq!(
            window
                .process_request("a", T + 1_000, 5)
                .await
                .expect("decision"),
            Decision::allow(1)
        );

        let record = stored(&store, "a").await;
        assert_eq!(record.current_tokens, 9);
        assert_eq!(record.fixed_window_start_ms, T);
        assert_eq!(record.previous_tokens, None);
    }

    #[tokio::test]
    async fn a_full_window_refuses_with_the_time_to_rollover() {
        let (window, _) = window(10, 6_000);
        window.process_request("a", T, 9).await.expect("fill");

        let decision = window
            .process_request("a", T + 5_999, 2)
            .await
            .expect("decision");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(decision.retry_after, Some(RetryAfter::Ms(1)));
    }

    #[tokio::test]
    async fn the_count_resets_at_rollover() {
        let (window, store) = window(10, 6_000);
        window.process_request("a", T, 9).await.expect("fill");
        window
            .process_request("a", T + 5_999, 2)
            .await
            .expect("refused");

        let decision = window
            .process_request("a", T + 6_000, 1)
            .await
            .expect("decision");
        assert_eq!(decision, Decision::allow(9));

        let record = stored(&store, "a").await;
        assert_eq!(record.current_tokens, 1);
        assert_eq!(record.fixed_window_start_ms, T + 6_000);
    }

    #[tokio::test]
    async fn several_idle_windows_advance_in_one_step() {
        let (window, store) = window(10, 6_000);
        window.process_request("a", T, 9).await.expect("fill");

        window
            .process_request("a", T + 20_500, 3)
            .await
            .expect("decision");
        let record = stored(&store, "a").await;
        // Three whole windows elapsed; the start stays aligned to T.
        assert_eq!(record.fixed_window_start_ms, T + 18_000);
        assert_eq!(record.current_tokens, 3);
    }

    #[tokio::test]
    async fn cost_above_capacity_is_never_admitted() {
        let (window, store) = window(10, 6_000);
        let decision = window.process_request("a", T, 11).await.expect("decision");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert_eq!(decision.retry_after, Some(RetryAfter::Never));
        // The record is still written.
        assert_eq!(stored(&store, "a").await.current_tokens, 0);
    }

    #[tokio::test]
    async fn resubmitting_at_the_hint_lands_in_the_next_window() {
        let (window, _) = window(10, 6_000);
        window.process_request("a", T + 123, 10).await.expect("fill");

        let denied = window
            .process_request("a", T + 4_000, 5)
            .await
            .expect("decision");
        let Some(RetryAfter::Ms(wait)) = denied.retry_after else {
            panic!("expected a finite retry hint");
        };
        let retried = window
            .process_request("a", T + 4_000 + wait, 5)
            .await
            .expect("decision");
        assert!(retried.allowed);
    }

    #[tokio::test]
    async fn a_window_never_admits_more_than_capacity() {
        // Windows stay aligned to the first request, so the admitted total
        // per aligned window must never exceed capacity.
        let (window, _) = window(10, 5_000);
        let mut admitted_per_window = std::collections::HashMap::<u64, u64>::new();
        let mut ts = T;
        let mut state = 11u64;
        for _ in 0..300 {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let cost = state % 5;
            let decision = window.process_request("a", ts, cost).await.expect("decision");
            if decision.allowed {
                *admitted_per_window.entry((ts - T) / 5_000).or_default() += cost;
            }
            ts += (state >> 5) % 700;
        }
        assert!(admitted_per_window.values().all(|total| *total <= 10));
        // The trace actually spanned several windows.
        assert!(admitted_per_window.len() > 10);
    }
}
