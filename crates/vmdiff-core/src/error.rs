//! Error types for sessions and test providers

use thiserror::Error;
use vmdiff_metrics::MetricsError;
use vmdiff_statetest::StateTestError;
use vmdiff_trace::CompareError;
use vmdiff_vms::VmError;

/// Test provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Test could not be stored or read
    #[error("state test error: {0}")]
    StateTest(#[from] StateTestError),

    /// Generator failed
    #[error("generator error: {0}")]
    Generator(String),
}

/// Session error type
#[derive(Error, Debug)]
pub enum SessionError {
    /// Invalid configuration, detected before any execution
    #[error("configuration error: {0}")]
    Config(String),

    /// The provider failed; the session stopped after draining
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A VM failed outside of a fuzzing session
    #[error("vm error: {0}")]
    Vm(#[from] VmError),

    /// Comparison setup error
    #[error("compare error: {0}")]
    Compare(#[from] CompareError),

    /// Test files could not be listed or read
    #[error("state test error: {0}")]
    StateTest(#[from] StateTestError),

    /// Statistics persistence failed
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A session task panicked or was cancelled
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
