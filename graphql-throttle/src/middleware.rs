use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;

use crate::cache::RateLimitStore;
use crate::configuration::ThrottleConfig;
use crate::cost::CostAnalyzer;
use crate::cost::TypeWeights;
use crate::cost::Variables;
use crate::error::ThrottleError;
use crate::limits::Decision;
use crate::limits::Limiter;

/// Ready-to-embed decision surface: scores an operation and charges the
/// caller's budget in one call.
///
/// The HTTP layer stays outside: callers hand in a parsed document, a
/// caller id and a timestamp, and translate the returned [`Decision`] into
/// their transport's refusal (for HTTP, status 429 with `Retry-After`
/// rounded up to whole seconds, omitted when the retry hint is `"∞"`).
pub struct Throttle {
    analyzer: CostAnalyzer,
    limiter: Limiter,
    dark: bool,
    depth_limit: Option<usize>,
}

impl Throttle {
    /// Build the table from `schema` and bind the configured algorithm to
    /// `store`.
    pub fn new(
        config: ThrottleConfig,
        schema: &Valid<Schema>,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, ThrottleError> {
        let weights = Arc::new(TypeWeights::from_schema(
            schema,
            &config.type_weights,
            &config.slicing_arguments,
        ));
        Self::with_weights(config, weights, store)
    }

    /// Same, with a hand-tuned table instead of one derived from the
    /// schema.
    pub fn with_weights(
        config: ThrottleConfig,
        weights: Arc<TypeWeights>,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, ThrottleError> {
        let analyzer =
            CostAnalyzer::new(weights).enforce_bounded_lists(config.enforce_bounded_lists);
        let limiter = Limiter::new(&config.algorithm, store, config.ttl)?;
        Ok(Self {
            analyzer,
            limiter,
            dark: config.dark,
            depth_limit: config.depth_limit,
        })
    }

    /// Score `document` and charge the result against `caller_id`'s budget.
    ///
    /// In dark mode a denial is logged and returned as allowed, with
    /// `remaining` and `retry_after` untouched so adapters can still emit
    /// advisory headers.
    pub async fn check(
        &self,
        caller_id: &str,
        document: &ExecutableDocument,
        variables: &Variables,
        timestamp_ms: u64,
    ) -> Result<Decision, ThrottleError> {
        if let Some(limit) = self.depth_limit {
            let depth = CostAnalyzer::depth(document);
            if depth > limit {
                return Err(ThrottleError::InvalidQuery(format!(
                    "operation depth {depth} exceeds the configured limit of {limit}"
                )));
            }
        }

        let cost = self.analyzer.cost(document, variables)?;
        let decision = self
            .limiter
            .process_request(caller_id, timestamp_ms, cost)
            .await?;

        if !decision.allowed {
            if self.dark {
                tracing::warn!(
                    caller_id,
                    cost,
                    remaining = decision.remaining,
                    "rate limit exceeded, not enforced"
                );
                return Ok(Decision {
                    allowed: true,
                    ..decision
                });
            }
            tracing::debug!(
                caller_id,
                cost,
                remaining = decision.remaining,
                "rate limit exceeded"
            );
        }
        Ok(decision)
    }

    /// Clear every stored caller budget. For tests and emergency operator
    /// use.
    pub async fn reset(&self) -> Result<(), ThrottleError> {
        self.limiter.reset().await
    }
}
