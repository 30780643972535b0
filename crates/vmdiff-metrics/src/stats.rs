//! Per-VM execution statistics

use crate::SlidingAverage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Runs before a new longest execution counts as slow
pub const DEFAULT_WARMUP: u64 = 500;

/// Rolling execution statistics of one VM
#[derive(Debug)]
pub struct VmStats {
    count: AtomicU64,
    longest_nanos: AtomicU64,
    exec_nanos: SlidingAverage,
    warmup: u64,
}

impl VmStats {
    /// Stats with the default warm-up
    pub fn new() -> Self {
        Self::with_warmup(DEFAULT_WARMUP)
    }

    /// Stats flagging slow runs only after `warmup` executions
    pub fn with_warmup(warmup: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            longest_nanos: AtomicU64::new(0),
            exec_nanos: SlidingAverage::new(),
            warmup,
        }
    }

    /// Record an execution started at `start`. Returns the elapsed time and whether
    /// it was slow: a new longest run after the warm-up.
    pub fn trace_done(&self, start: Instant) -> (Duration, bool) {
        let elapsed = start.elapsed();
        (elapsed, self.record(elapsed))
    }

    /// Record an execution time; returns the slow flag
    pub fn record(&self, elapsed: Duration) -> bool {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.exec_nanos.add(nanos as f64);
        let previous = self.longest_nanos.fetch_max(nanos, Ordering::Relaxed);
        nanos > previous && count > self.warmup
    }

    /// Number of recorded executions
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Longest recorded execution
    pub fn longest(&self) -> Duration {
        Duration::from_nanos(self.longest_nanos.load(Ordering::Relaxed))
    }

    /// Decaying average execution time
    pub fn exec_speed(&self) -> Duration {
        Duration::from_nanos(self.exec_nanos.avg() as u64)
    }

    /// Key/value pairs for the progress line
    pub fn stats(&self) -> Vec<(&'static str, String)> {
        vec![
            ("execSpeed", format!("{:?}", round_to(self.exec_speed(), 100_000))),
            ("longest", format!("{:?}", self.longest())),
            ("count", self.count().to_string()),
        ]
    }
}

impl Default for VmStats {
    fn default() -> Self {
        Self::new()
    }
}

fn round_to(d: Duration, nanos: u64) -> Duration {
    let total = d.as_nanos() as u64;
    Duration::from_nanos((total + nanos / 2) / nanos * nanos)
}
