//! `speed`: time every test on every VM

use super::{build, close};
use crate::output::Output;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use vmdiff_core::{test_speed, SessionConfig};
use vmdiff_vms::VmSpec;

#[derive(Default)]
struct Totals {
    runs: u64,
    total: Duration,
    longest: Duration,
}

pub async fn execute(
    specs: &[VmSpec],
    config: &SessionConfig,
    dir: &Path,
    out: Output,
) -> anyhow::Result<bool> {
    let vms = build(specs, config, 1)?;
    let samples = test_speed(&vms, dir).await;
    close(&vms).await;
    let samples = samples?;

    let mut totals: BTreeMap<&str, Totals> = BTreeMap::new();
    for sample in &samples {
        let entry = totals.entry(sample.vm.as_str()).or_default();
        entry.runs += 1;
        entry.total += sample.exec_time;
        entry.longest = entry.longest.max(sample.exec_time);
    }

    let mut record = out.record().field("dir", dir.display().to_string());
    let mut summary = serde_json::Map::new();
    for (vm, t) in &totals {
        summary.insert(
            vm.to_string(),
            serde_json::json!({
                "runs": t.runs,
                "totalMicros": t.total.as_micros() as u64,
                "longestMicros": t.longest.as_micros() as u64,
            }),
        );
        record = record.line(format!(
            "{}: {} runs, total {:?}, longest {:?}",
            vm, t.runs, t.total, t.longest
        ));
    }
    record.field("vms", summary).print();
    Ok(true)
}
