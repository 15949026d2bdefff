/// Errors surfaced by the analyzer, the limiters, and the storage layer.
///
/// None of these are retried internally. Decoding failures on stored records
/// are the one recovered case: the record is discarded as if it were absent,
/// so a single corrupt blob self-heals on the next write.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ThrottleError {
    /// A limiter or table was constructed with non-positive parameters.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The analyzer met a field or parent type with no row in the
    /// type-weight table.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The operation is malformed: inline fragment without a type condition,
    /// unknown fragment spread, or a shape rejected by a configured limit.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Summing weights exceeded the width of the cost integer.
    #[error("query cost overflowed while scoring {0}")]
    CostOverflow(String),

    /// The store round-trip failed or timed out.
    #[error("rate limit store unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored record could not be decoded.
    #[error("stored record under {key:?} could not be decoded: {message}")]
    DecodeError { key: String, message: String },
}

impl ThrottleError {
    /// Stable machine-readable code, for adapters that map errors onto a
    /// wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            ThrottleError::ConfigInvalid(_) => "CONFIG_INVALID",
            ThrottleError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            ThrottleError::InvalidQuery(_) => "INVALID_QUERY",
            ThrottleError::CostOverflow(_) => "COST_OVERFLOW",
            ThrottleError::StorageUnavailable(_) => "BACKEND_UNAVAILABLE",
            ThrottleError::DecodeError { .. } => "DECODE_ERROR",
        }
    }
}

impl From<fred::error::Error> for ThrottleError {
    fn from(err: fred::error::Error) -> Self {
        ThrottleError::StorageUnavailable(err.to_string())
    }
}
