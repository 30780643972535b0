//! Consensus failure reporting

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use vmdiff_trace::ComparisonOutcome;

/// Base URL of the notification service
pub const NTFY_URL: &str = "https://ntfy.sh";

/// One VM's part in a reproduced test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    /// VM name
    pub vm: String,
    /// Canonical trace written by the VM
    pub output: PathBuf,
    /// Command line used
    pub command: String,
}

/// The operator-facing block describing a consensus failure
pub fn consensus_block(test: &Path, runs: &[TestRun], outcome: &ComparisonOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Consensus error");
    let _ = writeln!(out, "Testcase: {}", test.display());
    for run in runs {
        let _ = writeln!(out, "- {}: {}", run.vm, run.output.display());
        let _ = writeln!(out, "  - command: {}", run.command);
    }
    if let [a, b, ..] = runs {
        let _ = writeln!(out, "\nTo view the difference with tracediff:");
        let _ = writeln!(out, "\ttracediff {} {}", a.output.display(), b.output.display());
    }
    let _ = writeln!(out);
    match outcome {
        ComparisonOutcome::Divergent(divergence) => {
            let _ = writeln!(out, "{}", divergence);
        }
        ComparisonOutcome::ClientError { client, error } => {
            let _ = writeln!(out, "{} failed: {}", client, error);
        }
        ComparisonOutcome::Agree(_) => {
            let _ = writeln!(out, "No difference on re-execution");
        }
    }
    out
}

/// Post `message` to the ntfy.sh `topic`
pub async fn notify(topic: &str, message: &str) -> Result<(), reqwest::Error> {
    reqwest::Client::new()
        .post(format!("{}/{}", NTFY_URL, topic))
        .header(reqwest::header::CONTENT_TYPE, "text/plain")
        .body(message.to_string())
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Name of a raw-debug output file
pub fn raw_debug_path(outdir: &Path, timestamp: u64, vm_index: usize, vm: &str) -> PathBuf {
    outdir.join(format!("raw-{}-vm-{}-{}-flaw.output", timestamp, vm_index, vm))
}

/// Copy the outputs of disagreeing clients into the output directory
pub(crate) async fn store_raw_outputs(outdir: &Path, outputs: &[(usize, &str, &Path)]) -> Vec<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let mut stored = Vec::with_capacity(outputs.len());
    for (index, vm, source) in outputs {
        let target = raw_debug_path(outdir, timestamp, *index, vm);
        match tokio::fs::copy(source, &target).await {
            Ok(_) => stored.push(target),
            Err(e) => warn!(file = %target.display(), error = %e, "Failed storing raw output"),
        }
    }
    if !stored.is_empty() {
        info!(files = ?stored, "Stored consensus-breaking output into files");
    }
    stored
}
