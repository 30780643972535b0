//! Error types for trace handling

use thiserror::Error;

/// Trace error type
#[derive(Error, Debug)]
pub enum TraceError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single line exceeded the scanner buffer
    #[error("line of {size} bytes exceeds the {max} byte limit")]
    LineTooLong {
        /// Size of the offending line
        size: usize,
        /// Configured maximum
        max: usize,
    },
}

/// Comparison error type
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CompareError {
    /// Less than two participants were supplied
    #[error("need at least two clients to compare, got {0}")]
    TooFewClients(usize),

    /// Client names and sources do not line up
    #[error("have {names} client names but {sources} sources")]
    Mismatched {
        /// Number of names
        names: usize,
        /// Number of sources
        sources: usize,
    },
}

/// Result type for trace operations
pub type TraceResult<T> = Result<T, TraceError>;
