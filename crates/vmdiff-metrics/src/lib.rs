//! # vmdiff-metrics
//!
//! Execution statistics for differential fuzzing sessions.
//!
//! Features:
//! - Decaying sliding average
//! - Per-VM execution stats with slow-run detection
//! - Cross-run test counter with a pluggable store
//! - Execution time histograms and JSON export

#![warn(missing_docs)]
#![warn(clippy::all)]

mod average;
pub mod collector;
mod counter;
mod error;
mod export;
mod histogram;
mod stats;

pub use average::SlidingAverage;
pub use collector::Metrics;
pub use counter::{CounterStore, FileCounterStore, GlobalCounter, MemoryCounterStore};
pub use error::{MetricsError, MetricsResult};
pub use export::{HistogramSummary, MetricsSnapshot};
pub use histogram::Histogram;
pub use stats::{VmStats, DEFAULT_WARMUP};
