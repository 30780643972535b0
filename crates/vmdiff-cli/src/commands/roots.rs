//! `roots`: one test, state roots only

use super::{build, close};
use crate::output::Output;
use std::path::Path;
use vmdiff_core::{roots_equal, SessionConfig};
use vmdiff_trace::RootOutcome;
use vmdiff_vms::VmSpec;

pub async fn execute(
    specs: &[VmSpec],
    config: &SessionConfig,
    test: &Path,
    out: Output,
) -> anyhow::Result<bool> {
    let vms = build(specs, config, 2)?;
    let report = roots_equal(&vms, test).await;
    close(&vms).await;
    let report = report?;

    let mismatched = match &report.outcome {
        RootOutcome::Agree(_) => Vec::new(),
        RootOutcome::Disagree { mismatched, .. } => mismatched.clone(),
    };
    let mut record = out
        .record()
        .field("test", test.display().to_string())
        .field("agree", mismatched.is_empty());
    let mut roots = serde_json::Map::new();
    for (i, (vm, result)) in report.roots.iter().enumerate() {
        roots.insert(vm.clone(), result.root.clone().into());
        let marker = if mismatched.contains(&i) { "  <- differs" } else { "" };
        record = record.line(format!("{}: {}{}", vm, result.root, marker));
        record = record.line(format!("  command: {}", result.command));
    }
    record = record.field("roots", roots);
    let record = match &report.outcome {
        RootOutcome::Agree(root) => record.line(format!("Roots agree: {}", root)),
        RootOutcome::Disagree { reference, .. } => {
            record.line(format!("Roots differ from {}", reference))
        }
    };
    record.print();
    Ok(mismatched.is_empty())
}
