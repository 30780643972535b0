//! Periodic progress reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info};
use vmdiff_metrics::{GlobalCounter, SlidingAverage};
use vmdiff_vms::Evm;

/// Interval before the tick following `ticks` reports
pub fn report_interval(ticks: u64, first: Duration) -> Duration {
    match ticks {
        0..=4 => first,
        5..=64 => Duration::from_secs(60),
        _ => Duration::from_secs(3600),
    }
}

pub(crate) struct Progress {
    pub completed: Arc<AtomicU64>,
    pub counter: Arc<GlobalCounter>,
    pub trace_length: Arc<SlidingAverage>,
    pub vms: Vec<Arc<dyn Evm>>,
    pub first_interval: Duration,
}

impl Progress {
    /// Report until `done` flips to true
    pub async fn run(self, mut done: watch::Receiver<bool>) {
        let start = Instant::now();
        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(report_interval(ticks, self.first_interval)) => {
                    ticks += 1;
                    self.report(start.elapsed());
                }
                changed = done.changed() => {
                    if changed.is_err() || *done.borrow() {
                        break;
                    }
                }
            }
        }
    }

    fn report(&self, elapsed: Duration) {
        let tests = self.completed.load(Ordering::Relaxed);
        self.counter.set_session(tests);
        if let Err(e) = self.counter.persist() {
            error!(error = %e, "Error saving progress");
        }
        let rate = tests as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        info!(
            tests,
            time = ?Duration::from_secs(elapsed.as_secs()),
            tests_per_sec = format!("{:.1}", rate),
            avg_steps = format!("{:.1}", self.trace_length.avg()),
            global = self.counter.total(),
            "Executing"
        );
        for vm in &self.vms {
            let stats = vm
                .stats()
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ");
            info!(vm = vm.name(), %stats, "Stats");
        }
    }
}
