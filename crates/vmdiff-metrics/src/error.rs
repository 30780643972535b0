//! Error types for metrics persistence

use thiserror::Error;

/// Metrics error type
#[derive(Error, Debug)]
pub enum MetricsError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisted counter is not a number
    #[error("invalid counter value {0:?}")]
    InvalidCounter(String),
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;
