//! Export engine error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for a single export attempt.
pub type ExportResult<T> = Result<T, ExportError>;

/// Why an export attempt did not reach the collector.
///
/// Returned as a value, never raised; the coordinator turns any of these
/// into a failover decision.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExportError {
    #[error("collector unavailable: {0}")]
    Unavailable(String),

    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    #[error("collector rejected export ({code:?}): {message}")]
    Rejected { code: tonic::Code, message: String },

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("exporter is shut down")]
    Closed,
}

/// Errors from building or driving the engine lifecycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already stopped; it cannot be restarted")]
    AlreadyStopped,

    #[error("config error: {0}")]
    Config(#[from] cascade_core::ConfigError),

    #[error("exporter error: {0}")]
    Export(#[from] ExportError),
}

pub type EngineResult<T> = Result<T, EngineError>;
