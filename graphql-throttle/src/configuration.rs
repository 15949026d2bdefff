use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::cache::DEFAULT_TTL;
use crate::error::ThrottleError;

/// Default weights applied while building a type-weight table from a schema.
///
/// The four knobs cover the cases a static estimate can distinguish without
/// resolver knowledge: mutations are expensive, objects cost a fetch,
/// scalars ride along for free, and list nodes behind a slicing argument
/// cost `connection` apiece.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeWeightsConfig {
    /// Weight of every field on the mutation root.
    pub mutation: u64,
    /// Weight of object, interface and union types.
    pub object: u64,
    /// Weight of scalar and enum fields.
    pub scalar: u64,
    /// Per-node multiplier for list fields bounded by a slicing argument.
    pub connection: u64,
}

impl Default for TypeWeightsConfig {
    fn default() -> Self {
        Self {
            mutation: 10,
            object: 1,
            scalar: 0,
            connection: 2,
        }
    }
}

/// Which algorithm guards a caller's budget, with its parameters.
///
/// `capacity` is the most tokens chargeable within the algorithm's
/// accounting unit. Buckets take a refill (or drain) rate in tokens per
/// second; window algorithms take the window length.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    TokenBucket {
        capacity: u64,
        refill_rate: f64,
    },
    LeakyBucket {
        capacity: u64,
        refill_rate: f64,
    },
    FixedWindow {
        capacity: u64,
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
    SlidingWindowLog {
        capacity: u64,
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
    SlidingWindowCounter {
        capacity: u64,
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
}

impl AlgorithmConfig {
    pub(crate) fn validate(&self) -> Result<(), ThrottleError> {
        let capacity = match self {
            AlgorithmConfig::TokenBucket { capacity, .. }
            | AlgorithmConfig::LeakyBucket { capacity, .. }
            | AlgorithmConfig::FixedWindow { capacity, .. }
            | AlgorithmConfig::SlidingWindowLog { capacity, .. }
            | AlgorithmConfig::SlidingWindowCounter { capacity, .. } => *capacity,
        };
        if capacity == 0 {
            return Err(ThrottleError::ConfigInvalid(
                "capacity must be strictly positive".to_string(),
            ));
        }
        match self {
            AlgorithmConfig::TokenBucket { refill_rate, .. }
            | AlgorithmConfig::LeakyBucket { refill_rate, .. } => {
                if !refill_rate.is_finite() || *refill_rate <= 0.0 {
                    return Err(ThrottleError::ConfigInvalid(
                        "refill_rate must be a strictly positive number of tokens per second"
                            .to_string(),
                    ));
                }
            }
            AlgorithmConfig::FixedWindow { window, .. }
            | AlgorithmConfig::SlidingWindowLog { window, .. }
            | AlgorithmConfig::SlidingWindowCounter { window, .. } => {
                if window.as_millis() == 0 {
                    return Err(ThrottleError::ConfigInvalid(
                        "window must be at least one millisecond".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_slicing_arguments() -> Vec<String> {
    ["first", "last", "limit"].map(str::to_string).to_vec()
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

/// Options accepted by [`Throttle::new`](crate::Throttle::new).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    pub algorithm: AlgorithmConfig,
    #[serde(default)]
    pub type_weights: TypeWeightsConfig,
    /// Log denials without enforcing them.
    #[serde(default)]
    pub dark: bool,
    /// Reject list fields that have no size-bounding argument.
    #[serde(default)]
    pub enforce_bounded_lists: bool,
    /// Reject operations nested deeper than this before costing them.
    #[serde(default)]
    pub depth_limit: Option<usize>,
    /// Argument names recognized as bounding a list field's size.
    #[serde(default = "default_slicing_arguments")]
    pub slicing_arguments: Vec<String>,
    /// How long an idle caller's record survives in the store.
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl ThrottleConfig {
    /// A configuration with the given algorithm and every other option at
    /// its default.
    pub fn new(algorithm: AlgorithmConfig) -> Self {
        Self {
            algorithm,
            type_weights: TypeWeightsConfig::default(),
            dark: false,
            enforce_bounded_lists: false,
            depth_limit: None,
            slicing_arguments: default_slicing_arguments(),
            ttl: DEFAULT_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_deserialize() {
        let config: ThrottleConfig = serde_json::from_value(serde_json::json!({
            "algorithm": { "kind": "fixed_window", "capacity": 10, "window": "6s" },
        }))
        .expect("valid config");
        assert_eq!(config.type_weights.mutation, 10);
        assert_eq!(config.type_weights.object, 1);
        assert_eq!(config.type_weights.scalar, 0);
        assert_eq!(config.type_weights.connection, 2);
        assert!(!config.dark);
        assert_eq!(config.ttl, Duration::from_millis(86_400_000));
        assert_eq!(config.slicing_arguments, vec!["first", "last", "limit"]);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = AlgorithmConfig::TokenBucket {
            capacity: 0,
            refill_rate: 1.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ThrottleError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn non_positive_refill_rate_is_rejected() {
        for refill_rate in [0.0, -2.5, f64::NAN, f64::INFINITY] {
            let config = AlgorithmConfig::LeakyBucket {
                capacity: 10,
                refill_rate,
            };
            assert!(matches!(
                config.validate(),
                Err(ThrottleError::ConfigInvalid(_))
            ));
        }
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = AlgorithmConfig::SlidingWindowCounter {
            capacity: 10,
            window: Duration::ZERO,
        };
        assert!(matches!(
            config.validate(),
            Err(ThrottleError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn positive_parameters_validate() {
        AlgorithmConfig::TokenBucket {
            capacity: 10,
            refill_rate: 0.5,
        }
        .validate()
        .expect("fractional refill rates are legal");
        AlgorithmConfig::SlidingWindowLog {
            capacity: 1,
            window: Duration::from_millis(1),
        }
        .validate()
        .expect("one-millisecond windows are legal");
    }
}
