//! Error types for VM adapters

use thiserror::Error;
use vmdiff_trace::TraceError;

/// VM adapter error type
#[derive(Error, Debug)]
pub enum VmError {
    /// The binary could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// Command line
        command: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// A child pipe was unavailable or broke
    #[error("pipe to `{command}` failed: {reason}")]
    Pipe {
        /// Command line
        command: String,
        /// What went wrong
        reason: String,
    },

    /// The child exited unsuccessfully
    #[error("`{command}` exited with {status}")]
    Exit {
        /// Command line
        command: String,
        /// Exit status
        status: String,
    },

    /// A batch child closed its output before finishing the test
    #[error("`{command}` ended its output before the state root")]
    Truncated {
        /// Command line
        command: String,
    },

    /// No state root could be found in the output
    #[error("{vm}: no state root found in output of `{command}`")]
    MissingStateRoot {
        /// VM name
        vm: String,
        /// Command line
        command: String,
    },

    /// The client cannot run in the requested mode
    #[error("{vm} does not support {mode}")]
    Unsupported {
        /// VM name
        vm: String,
        /// Requested mode
        mode: &'static str,
    },

    /// The binary does not exist or is not on PATH
    #[error("binary not found: {0}")]
    MissingBinary(String),

    /// IO error on the output sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Trace stream error
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
}

impl VmError {
    /// Command line associated with the error, if any
    pub fn command(&self) -> Option<&str> {
        match self {
            VmError::Spawn { command, .. }
            | VmError::Pipe { command, .. }
            | VmError::Exit { command, .. }
            | VmError::Truncated { command }
            | VmError::MissingStateRoot { command, .. } => Some(command),
            _ => None,
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
