//! Executor task: runs each dispatched test on every VM and routes the verdict

use crate::cleanup::CleanupTask;
use crate::error::SessionResult;
use crate::report::store_raw_outputs;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use vmdiff_metrics::collector::{CONSENSUS, INCONCLUSIVE, SLOW, TESTS};
use vmdiff_metrics::{Metrics, SlidingAverage};
use vmdiff_trace::{compare_roots, Comparator, ComparisonOutcome, RootOutcome, TraceReader};
use vmdiff_vms::{Evm, ExecResult, VmResult};

/// Verdict on one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Agree { slow: bool },
    Divergent { description: String },
    Inconclusive { reason: String },
}

/// Per-executor counts
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ExecutorStats {
    pub inconclusive: u64,
    pub skipped: u64,
}

/// Channels and shared state an executor reports through
pub(crate) struct Routes {
    pub dispatch: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    pub cleanup: mpsc::Sender<CleanupTask>,
    pub consensus: mpsc::Sender<PathBuf>,
    pub abort: Arc<AtomicBool>,
    pub completed: Arc<AtomicU64>,
}

pub(crate) struct Executor {
    thread_id: usize,
    vms: Vec<Arc<dyn Evm>>,
    base_names: Vec<String>,
    outputs: Vec<PathBuf>,
    comparator: Comparator,
    skip_trace: bool,
    raw_debug: Option<PathBuf>,
    metrics: Arc<Metrics>,
    trace_length: Arc<SlidingAverage>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thread_id: usize,
        base: &[Arc<dyn Evm>],
        outdir: &Path,
        skip_trace: bool,
        raw_debug: bool,
        trace: vmdiff_trace::TraceConfig,
        metrics: Arc<Metrics>,
        trace_length: Arc<SlidingAverage>,
    ) -> SessionResult<Self> {
        let vms: Vec<Arc<dyn Evm>> = base.iter().map(|vm| vm.instance(thread_id)).collect();
        let names: Vec<String> = vms.iter().map(|vm| vm.name().to_string()).collect();
        let outputs = names
            .iter()
            .map(|name| outdir.join(format!(".{}.trace.jsonl", name)))
            .collect();
        Ok(Self {
            thread_id,
            comparator: Comparator::new(names, trace)?,
            vms,
            base_names: base.iter().map(|vm| vm.name().to_string()).collect(),
            outputs,
            skip_trace,
            raw_debug: raw_debug.then(|| outdir.to_path_buf()),
            metrics,
            trace_length,
        })
    }

    /// Consume dispatched tests until the channel closes. After an abort, remaining
    /// tests are drained without being executed.
    pub async fn run(self, routes: Routes) -> ExecutorStats {
        let mut stats = ExecutorStats::default();
        loop {
            let next = routes.dispatch.lock().await.recv().await;
            let Some(test) = next else { break };
            if routes.abort.load(Ordering::SeqCst) {
                debug!(file = %test.display(), "Shortcutting through abort");
                stats.skipped += 1;
                continue;
            }
            let verdict = self.execute(&test).await;
            routes.completed.fetch_add(1, Ordering::Relaxed);
            self.metrics.counter(TESTS, 1);
            let task = match verdict {
                Verdict::Agree { slow: true } => {
                    self.metrics.counter(SLOW, 1);
                    CleanupTask::Slow(test)
                }
                Verdict::Agree { slow: false } => CleanupTask::Remove(test),
                Verdict::Inconclusive { reason } => {
                    warn!(file = %test.display(), %reason, "Inconclusive test");
                    self.metrics.counter(INCONCLUSIVE, 1);
                    stats.inconclusive += 1;
                    CleanupTask::Remove(test)
                }
                Verdict::Divergent { description } => {
                    error!(file = %test.display(), "Consensus flaw\n{}", description);
                    self.metrics.counter(CONSENSUS, 1);
                    routes.abort.store(true, Ordering::SeqCst);
                    let _ = routes.consensus.send(test).await;
                    continue;
                }
            };
            let _ = routes.cleanup.send(task).await;
        }
        self.close().await;
        debug!(thread = self.thread_id, "Executor exiting");
        stats
    }

    pub async fn execute(&self, test: &Path) -> Verdict {
        let verdict = if self.skip_trace {
            Ok(self.execute_roots(test).await)
        } else {
            self.execute_traced(test).await
        };
        verdict.unwrap_or_else(|e| Verdict::Inconclusive {
            reason: e.to_string(),
        })
    }

    /// Record timing of every run; the first failure makes the test inconclusive
    fn account(&self, test: &Path, results: Vec<VmResult<ExecResult>>) -> Result<(Vec<ExecResult>, bool), Verdict> {
        let mut slow = false;
        let mut done = Vec::with_capacity(results.len());
        for ((vm, base), result) in self.vms.iter().zip(&self.base_names).zip(results) {
            match result {
                Ok(result) => {
                    self.metrics.observe_exec(base, result.exec_time);
                    if result.slow {
                        warn!(vm = vm.name(), time = ?result.exec_time, cmd = %result.command, file = %test.display(), "Slow test found");
                    } else {
                        debug!(vm = vm.name(), time = ?result.exec_time, file = %test.display(), "Test executed");
                    }
                    slow |= result.slow;
                    done.push(result);
                }
                Err(e) => {
                    error!(vm = vm.name(), file = %test.display(), cmd = e.command().unwrap_or_default(), error = %e, "Error running vm");
                    return Err(Verdict::Inconclusive {
                        reason: format!("error running vm {}: {}", vm.name(), e),
                    });
                }
            }
        }
        Ok((done, slow))
    }

    async fn execute_traced(&self, test: &Path) -> SessionResult<Verdict> {
        let mut files = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            files.push(File::create(output).await?);
        }
        let results = join_all(
            self.vms
                .iter()
                .zip(files.iter_mut())
                .map(|(vm, file)| vm.run_state_test(test, file, false)),
        )
        .await;
        drop(files);
        let slow = match self.account(test, results) {
            Ok((_, slow)) => slow,
            Err(verdict) => return Ok(verdict),
        };

        let mut readers = Vec::with_capacity(self.outputs.len());
        for (vm, output) in self.vms.iter().zip(&self.outputs) {
            let file = File::open(output).await?;
            readers.push(TraceReader::new(BufReader::new(file), vm.name()));
        }
        let verdict = match self.comparator.compare(&mut readers).await? {
            ComparisonOutcome::Agree(agreement) => {
                self.trace_length.add(agreement.steps as f64);
                Verdict::Agree { slow }
            }
            ComparisonOutcome::Divergent(divergence) => {
                info!(file = %test.display(), vm = %divergence.other, reference = %divergence.reference, step = divergence.step, "Consensus flaw");
                if let Some(outdir) = &self.raw_debug {
                    let i = divergence.other_index;
                    store_raw_outputs(
                        outdir,
                        &[
                            (i, self.vms[i].name(), self.outputs[i].as_path()),
                            (0, self.vms[0].name(), self.outputs[0].as_path()),
                        ],
                    )
                    .await;
                }
                Verdict::Divergent {
                    description: divergence.to_string(),
                }
            }
            ComparisonOutcome::ClientError { client, error } => Verdict::Inconclusive {
                reason: format!("unreadable output of {}: {}", client, error),
            },
        };
        Ok(verdict)
    }

    async fn execute_roots(&self, test: &Path) -> Verdict {
        let results = join_all(self.vms.iter().map(|vm| async move {
            let mut sink = tokio::io::sink();
            vm.run_state_test(test, &mut sink, true).await
        }))
        .await;
        let (done, slow) = match self.account(test, results) {
            Ok(accounted) => accounted,
            Err(verdict) => return verdict,
        };
        let roots: Vec<String> = done
            .into_iter()
            .map(|r| r.state_root.unwrap_or_default())
            .collect();
        match compare_roots(&roots) {
            Ok(RootOutcome::Agree(_)) => Verdict::Agree { slow },
            Ok(RootOutcome::Disagree { mismatched, .. }) => {
                let mut description = format!(
                    "state roots differ from {} ({})",
                    self.vms[0].name(),
                    roots[0]
                );
                for i in mismatched {
                    description.push_str(&format!("\n  {}: {}", self.vms[i].name(), roots[i]));
                }
                Verdict::Divergent { description }
            }
            Err(e) => Verdict::Inconclusive {
                reason: e.to_string(),
            },
        }
    }

    async fn close(&self) {
        for vm in &self.vms {
            vm.close().await;
        }
        for output in &self.outputs {
            let _ = tokio::fs::remove_file(output).await;
        }
    }
}
