//! # vmdiff-core
//!
//! Differential execution of state tests across EVM implementations.
//!
//! Features:
//! - Pluggable test providers (closure, directory replay, generator)
//! - Concurrent sessions with bounded producers and executors
//! - Online trace or state-root comparison per test
//! - Delayed cleanup and slow-test archival
//! - Consensus reports with re-execution and ntfy.sh notification
//! - Single-test, roots and speed runners

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cleanup;
mod config;
mod error;
mod executor;
mod progress;
mod provider;
mod report;
mod runner;
mod session;

pub use cleanup::slow_test_path;
pub use config::SessionConfig;
pub use error::{ProviderError, SessionError, SessionResult};
pub use progress::report_interval;
pub use provider::{DirectoryProvider, FnProvider, GeneratorProvider, TestGenerator, TestProvider};
pub use report::{consensus_block, notify, raw_debug_path, TestRun, NTFY_URL};
pub use runner::{
    roots_equal, run_single_test, test_speed, RootsReport, SingleTestReport, SpeedSample,
};
pub use session::{Session, SessionReport, METRICS_FILE};
