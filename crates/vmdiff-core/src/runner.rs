//! One-off operations over a set of VMs: single test, roots check and speed test

use crate::error::SessionResult;
use crate::report::{consensus_block, TestRun};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::BufReader;
use tracing::{debug, info, warn};
use vmdiff_statetest::find_tests;
use vmdiff_trace::{
    compare_roots, CompareError, Comparator, ComparisonOutcome, RootOutcome, TraceConfig,
    TraceReader,
};
use vmdiff_vms::{Evm, RootResult};

/// Outcome of running one test on every VM
#[derive(Debug, Clone)]
pub struct SingleTestReport {
    /// Test file
    pub test: PathBuf,
    /// Per-VM outputs
    pub runs: Vec<TestRun>,
    /// Comparison of the outputs
    pub outcome: ComparisonOutcome,
}

impl SingleTestReport {
    /// Whether every VM agreed
    pub fn is_agree(&self) -> bool {
        self.outcome.is_agree()
    }

    /// Consensus block for the operator
    pub fn render(&self) -> String {
        consensus_block(&self.test, &self.runs, &self.outcome)
    }
}

/// Execute `test` on all `vms` in parallel, writing `<outdir>/<vm>-output.jsonl`, and
/// compare the outputs.
pub async fn run_single_test(
    vms: &[Arc<dyn Evm>],
    test: &Path,
    outdir: &Path,
    config: &TraceConfig,
) -> SessionResult<SingleTestReport> {
    let names: Vec<String> = vms.iter().map(|vm| vm.name().to_string()).collect();
    let comparator = Comparator::new(names, config.clone())?;
    tokio::fs::create_dir_all(outdir).await?;

    let outputs: Vec<PathBuf> = vms
        .iter()
        .map(|vm| outdir.join(format!("{}-output.jsonl", vm.name())))
        .collect();
    let mut files = Vec::with_capacity(outputs.len());
    for output in &outputs {
        files.push(File::create(output).await?);
    }
    let results = join_all(
        vms.iter()
            .zip(files.iter_mut())
            .map(|(vm, file)| vm.run_state_test(test, file, false)),
    )
    .await;
    drop(files);

    let mut runs = Vec::with_capacity(vms.len());
    for ((vm, output), result) in vms.iter().zip(&outputs).zip(results) {
        let result = result?;
        debug!(vm = vm.name(), time = ?result.exec_time, cmd = %result.command, "Test executed");
        runs.push(TestRun {
            vm: vm.name().to_string(),
            output: output.clone(),
            command: result.command,
        });
    }

    let mut readers = Vec::with_capacity(outputs.len());
    for (vm, output) in vms.iter().zip(&outputs) {
        let file = File::open(output).await?;
        readers.push(TraceReader::new(BufReader::new(file), vm.name()));
    }
    let outcome = comparator.compare(&mut readers).await?;
    Ok(SingleTestReport {
        test: test.to_path_buf(),
        runs,
        outcome,
    })
}

/// State roots reported for one test
#[derive(Debug, Clone)]
pub struct RootsReport {
    /// Per-VM roots, in VM order
    pub roots: Vec<(String, RootResult)>,
    /// Comparison against the first VM
    pub outcome: RootOutcome,
}

/// Ask every VM for the post state root of `test` and compare them. Any VM failure
/// is returned as an error.
pub async fn roots_equal(vms: &[Arc<dyn Evm>], test: &Path) -> SessionResult<RootsReport> {
    if vms.len() < 2 {
        return Err(CompareError::TooFewClients(vms.len()).into());
    }
    let results = join_all(vms.iter().map(|vm| vm.state_root(test))).await;
    let mut roots = Vec::with_capacity(vms.len());
    for (vm, result) in vms.iter().zip(results) {
        roots.push((vm.name().to_string(), result?));
    }
    let outcome = compare_roots(
        &roots.iter().map(|(_, r)| r.root.as_str()).collect::<Vec<_>>(),
    )?;
    Ok(RootsReport { roots, outcome })
}

/// One timed execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedSample {
    /// VM name
    pub vm: String,
    /// Test file
    pub test: PathBuf,
    /// Wall clock time
    pub exec_time: Duration,
}

const NOTABLE: Duration = Duration::from_secs(1);
const SLOW: Duration = Duration::from_secs(5);

/// Run every test under `dir` on each VM in turn without tracing, logging the ones
/// that take a second or more. Failed executions are logged and skipped.
pub async fn test_speed(vms: &[Arc<dyn Evm>], dir: &Path) -> SessionResult<Vec<SpeedSample>> {
    let tests = find_tests(dir)?;
    info!(dir = %dir.display(), tests = tests.len(), "Speed test started");
    let mut samples = Vec::new();
    for test in &tests {
        for vm in vms {
            let mut sink = tokio::io::sink();
            let start = Instant::now();
            let result = match vm.run_state_test(test, &mut sink, true).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(vm = vm.name(), file = %test.display(), error = %e, "Error running test");
                    continue;
                }
            };
            let exec_time = start.elapsed();
            if exec_time < NOTABLE {
                debug!(vm = vm.name(), time = ?exec_time, file = %test.display(), "Test executed");
            } else if exec_time < SLOW {
                info!(vm = vm.name(), time = ?exec_time, cmd = %result.command, "Slow test");
            } else {
                warn!(vm = vm.name(), time = ?exec_time, cmd = %result.command, "Very slow test");
            }
            samples.push(SpeedSample {
                vm: vm.name().to_string(),
                test: test.clone(),
                exec_time,
            });
        }
    }
    Ok(samples)
}
