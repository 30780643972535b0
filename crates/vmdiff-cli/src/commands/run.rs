//! `run`: one test, full traces

use super::{build, close};
use crate::output::Output;
use std::collections::BTreeMap;
use std::path::Path;
use vmdiff_core::{run_single_test, SessionConfig};
use vmdiff_trace::ComparisonOutcome;
use vmdiff_vms::VmSpec;

pub async fn execute(
    specs: &[VmSpec],
    config: &SessionConfig,
    test: &Path,
    out: Output,
) -> anyhow::Result<bool> {
    let vms = build(specs, config, 2)?;
    let report = run_single_test(&vms, test, &config.outdir, &config.vm.trace).await;
    close(&vms).await;
    let report = report?;

    let outputs: BTreeMap<&str, String> = report
        .runs
        .iter()
        .map(|run| (run.vm.as_str(), run.output.display().to_string()))
        .collect();
    let record = out
        .record()
        .field("test", test.display().to_string())
        .field("agree", report.is_agree())
        .field("outputs", outputs);
    let record = match &report.outcome {
        ComparisonOutcome::Agree(agreement) => record
            .field("steps", agreement.steps)
            .field("stateRoot", &agreement.state_root)
            .line(format!(
                "All {} vms agree after {} steps",
                report.runs.len(),
                agreement.steps
            )),
        _ => record
            .field("report", report.render())
            .line(report.render()),
    };
    record.print();
    Ok(report.is_agree())
}
