//! `replay`: session over a directory of tests

use super::build;
use crate::output::Output;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use vmdiff_core::{DirectoryProvider, Session, SessionConfig};
use vmdiff_metrics::{FileCounterStore, GlobalCounter};
use vmdiff_vms::VmSpec;

pub async fn execute<F>(
    specs: &[VmSpec],
    config: SessionConfig,
    dir: &Path,
    out: Output,
    shutdown: F,
) -> anyhow::Result<bool>
where
    F: Future<Output = ()> + Send + 'static,
{
    let vms = build(specs, &config, 2)?;
    let provider = DirectoryProvider::new(dir)?;
    info!(dir = %dir.display(), tests = provider.total(), "Replaying tests");
    let counter = GlobalCounter::open(Box::new(FileCounterStore::new(&config.counter_file)))?;

    let report = Session::new(config, vms, Arc::new(provider))?
        .with_counter(counter)
        .run(shutdown)
        .await?;

    let consensus: Vec<String> = report
        .consensus
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let mut record = out
        .record()
        .field("completed", report.completed)
        .field("cleaned", report.cleaned)
        .field("archived", report.archived)
        .field("inconclusive", report.inconclusive)
        .field("skipped", report.skipped)
        .field("consensus", &consensus)
        .field("report", &report.consensus_report)
        .line(format!(
            "Executed {} tests ({} inconclusive, {} skipped)",
            report.completed, report.inconclusive, report.skipped
        ));
    for test in &consensus {
        record = record.line(format!("Consensus failure: {}", test));
    }
    if let Some(block) = &report.consensus_report {
        record = record.line(block.clone());
    }
    record.print();
    // A finished session exits cleanly even when it found a divergence
    Ok(true)
}
