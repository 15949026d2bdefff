//! Static cost analysis of GraphQL operations.
//!
//! A [`TypeWeights`] table maps type and field names to weights; the
//! [`CostAnalyzer`] walks a parsed operation against that table and produces
//! a single non-negative integer cost, before any resolver runs.

mod static_cost;
mod type_weights;

pub use static_cost::CostAnalyzer;
pub use type_weights::FieldWeight;
pub use type_weights::TypeWeight;
pub use type_weights::TypeWeights;
pub use type_weights::Weight;
pub use type_weights::WeightArgs;
pub use type_weights::WeightFn;

/// Variables sent alongside an operation, keyed by variable name.
pub type Variables = serde_json::Map<String, serde_json::Value>;
