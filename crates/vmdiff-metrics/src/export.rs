//! Metrics export and snapshot functionality

use crate::{Metrics, MetricsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values
    pub counters: BTreeMap<String, u64>,
    /// Execution time summaries per VM
    pub exec_times: BTreeMap<String, HistogramSummary>,
}

/// Summary of a histogram, in microseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Mean value
    pub mean: f64,
    /// Largest value
    pub max: u64,
    /// Total observation count
    pub count: u64,
    /// `(upper bound, count)` per bucket
    pub buckets: Vec<(Option<u64>, u64)>,
}

impl MetricsSnapshot {
    /// Create a snapshot from a Metrics instance
    pub fn from_metrics(metrics: &Metrics) -> Self {
        let counters = metrics.all_counters().into_iter().collect();
        let exec_times = metrics
            .all_histograms()
            .into_iter()
            .map(|(name, h)| {
                (
                    name,
                    HistogramSummary {
                        mean: h.mean(),
                        max: h.max(),
                        count: h.total_count(),
                        buckets: h.buckets(),
                    },
                )
            })
            .collect();

        Self {
            counters,
            exec_times,
        }
    }

    /// Export snapshot as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the snapshot as pretty JSON
    pub fn write_to(&self, path: &Path) -> MetricsResult<()> {
        std::fs::write(path, self.to_json()?)?;
        tracing::debug!(path = %path.display(), "Wrote metrics snapshot");
        Ok(())
    }
}
