//! Session metrics collector

use crate::Histogram;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tests fully executed
pub const TESTS: &str = "tests";
/// Tests archived as slow
pub const SLOW: &str = "slow";
/// Tests with at least one failing VM
pub const INCONCLUSIVE: &str = "inconclusive";
/// Tests on which the VMs disagreed
pub const CONSENSUS: &str = "consensus";

/// Thread-safe metrics storage
pub struct Metrics {
    /// Per-VM execution time histograms
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
    /// Event counters
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl Metrics {
    /// Create a new metrics store
    pub fn new() -> Self {
        Self {
            histograms: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Record one execution of `vm`
    pub fn observe_exec(&self, vm: &str, elapsed: Duration) {
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(vm) {
            h.observe(elapsed);
            return;
        }
        drop(histograms);

        let mut histograms = self.histograms.write();
        let h = histograms
            .entry(vm.to_string())
            .or_insert_with(|| Arc::new(Histogram::new()));
        h.observe(elapsed);
    }

    /// Increment a counter
    pub fn counter(&self, name: &str, delta: u64) {
        let counters = self.counters.read();
        if let Some(c) = counters.get(name) {
            c.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write();
        let c = counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        c.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get counter value, 0 if never incremented
    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Histogram of a VM, if it ran
    pub fn histogram(&self, vm: &str) -> Option<Arc<Histogram>> {
        self.histograms.read().get(vm).cloned()
    }

    /// Get all counter names and values
    pub fn all_counters(&self) -> Vec<(String, u64)> {
        self.counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    /// Get all VM names and histograms
    pub fn all_histograms(&self) -> Vec<(String, Arc<Histogram>)> {
        self.histograms
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
