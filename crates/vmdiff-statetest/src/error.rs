//! Error types for state test files

use thiserror::Error;

/// State test error type
#[derive(Error, Debug)]
pub enum StateTestError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Test name unusable as part of a file name
    #[error("invalid test name {0:?}")]
    InvalidName(String),
}

/// State test result type
pub type StateTestResult<T> = Result<T, StateTestError>;
