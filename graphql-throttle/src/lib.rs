//! GraphQL-aware rate limiting.
//!
//! An inbound operation is scored by a static complexity analysis driven by a
//! [type-weight table](TypeWeights), then charged against the caller's budget
//! by one of five interchangeable [rate limiting algorithms](Limiter). All
//! per-caller state lives in a shared key/value store (Redis through
//! [`RedisStore`], or [`InMemoryStore`] for tests and single-instance
//! deployments), so several application instances share one decision surface.
//!
//! [`Throttle`] ties the pieces together for embedding in an HTTP layer:
//!
//! ```no_run
//! # async fn demo() -> Result<(), graphql_throttle::ThrottleError> {
//! use std::sync::Arc;
//!
//! use apollo_compiler::ExecutableDocument;
//! use apollo_compiler::Schema;
//! use graphql_throttle::AlgorithmConfig;
//! use graphql_throttle::InMemoryStore;
//! use graphql_throttle::Throttle;
//! use graphql_throttle::ThrottleConfig;
//!
//! let schema = Schema::parse_and_validate("type Query { me: String }", "schema.graphql")
//!     .expect("valid schema");
//! let config = ThrottleConfig::new(AlgorithmConfig::TokenBucket {
//!     capacity: 100,
//!     refill_rate: 10.0,
//! });
//! let throttle = Throttle::new(config, &schema, Arc::new(InMemoryStore::new()))?;
//!
//! let document = ExecutableDocument::parse_and_validate(&schema, "{ me }", "op.graphql")
//!     .expect("valid operation");
//! let decision = throttle
//!     .check("caller-1", &document, &Default::default(), 1_000)
//!     .await?;
//! assert!(decision.allowed);
//! # Ok(())
//! # }
//! ```

mod cache;
mod configuration;
mod cost;
mod error;
mod limits;
mod middleware;

pub use cache::DEFAULT_TTL;
pub use cache::InMemoryStore;
pub use cache::RateLimitStore;
pub use cache::RedisStore;
pub use configuration::AlgorithmConfig;
pub use configuration::ThrottleConfig;
pub use configuration::TypeWeightsConfig;
pub use cost::CostAnalyzer;
pub use cost::FieldWeight;
pub use cost::TypeWeight;
pub use cost::TypeWeights;
pub use cost::Variables;
pub use cost::Weight;
pub use cost::WeightArgs;
pub use cost::WeightFn;
pub use error::ThrottleError;
pub use limits::Decision;
pub use limits::FixedWindow;
pub use limits::LeakyBucket;
pub use limits::Limiter;
pub use limits::RetryAfter;
pub use limits::SlidingWindowCounter;
pub use limits::SlidingWindowLog;
pub use limits::TokenBucket;
pub use middleware::Throttle;
