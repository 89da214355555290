//! Recording error types.

use thiserror::Error;

/// Result type alias for recording operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors returned to callers of the recording API.
///
/// These indicate a mistake at the call site, never a transient fault.
#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("malformed attribute {0:?}: expected key=value")]
    MalformedAttribute(String),

    #[error("attribute {0:?} has an empty key")]
    EmptyAttributeKey(String),

    #[error("invalid value {value} for monotonic counter {name}")]
    InvalidIncrement { name: String, value: f64 },

    #[error("non-finite value {value} for {name}")]
    InvalidValue { name: String, value: f64 },
}
