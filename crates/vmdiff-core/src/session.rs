//! Differential execution session
//!
//! Producers pull tests from a [`TestProvider`] onto a bounded dispatch channel.
//! Executors run each test on every VM and route it to cleanup, slow-test
//! archival or the consensus channel. A divergence, a provider error or the
//! shutdown future set the abort flag; the session then drains and returns.

use crate::cleanup::cleanup_loop;
use crate::config::SessionConfig;
use crate::error::{ProviderError, SessionError, SessionResult};
use crate::executor::{Executor, Routes};
use crate::progress::Progress;
use crate::provider::TestProvider;
use crate::report::notify;
use crate::runner::run_single_test;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vmdiff_metrics::{GlobalCounter, Metrics, MetricsSnapshot, SlidingAverage};
use vmdiff_vms::Evm;

/// Capacity of the dispatch channel
const DISPATCH_CAPACITY: usize = 4;

/// File name of the metrics snapshot written into the output directory
pub const METRICS_FILE: &str = "vmdiff-metrics.json";

/// Summary of a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Tests executed to a verdict
    pub completed: u64,
    /// Tests handed to cleanup
    pub cleaned: u64,
    /// Slow tests archived
    pub archived: u64,
    /// Tests with an adapter or output failure
    pub inconclusive: u64,
    /// Tests drained without execution after an abort
    pub skipped: u64,
    /// Divergent tests, preserved on disk
    pub consensus: Vec<PathBuf>,
    /// Consensus block of the re-executed first divergent test
    pub consensus_report: Option<String>,
}

impl SessionReport {
    /// Whether a consensus failure was found
    pub fn has_consensus_failure(&self) -> bool {
        !self.consensus.is_empty()
    }
}

/// A configured session over a fixed set of VMs
pub struct Session {
    config: SessionConfig,
    vms: Vec<Arc<dyn Evm>>,
    provider: Arc<dyn TestProvider>,
    counter: Arc<GlobalCounter>,
    metrics: Arc<Metrics>,
}

impl Session {
    /// Create a session; needs at least two VMs
    pub fn new(
        config: SessionConfig,
        vms: Vec<Arc<dyn Evm>>,
        provider: Arc<dyn TestProvider>,
    ) -> SessionResult<Self> {
        config.validate()?;
        if vms.len() < 2 {
            return Err(SessionError::Config(format!(
                "need at least two vms, got {}",
                vms.len()
            )));
        }
        Ok(Self {
            config,
            vms,
            provider,
            counter: Arc::new(GlobalCounter::in_memory()),
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Use `counter` for the cross-run test count
    pub fn with_counter(mut self, counter: GlobalCounter) -> Self {
        self.counter = Arc::new(counter);
        self
    }

    /// Session metrics
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run until the provider is exhausted, a divergence is found or `shutdown`
    /// completes. Only configuration and provider errors are returned.
    pub async fn run<F>(self, shutdown: F) -> SessionResult<SessionReport>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.config;
        tokio::fs::create_dir_all(&config.outdir).await?;

        let abort = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU64::new(0));
        let trace_length = Arc::new(SlidingAverage::new());

        let executors = (0..config.threads)
            .map(|thread_id| {
                Executor::new(
                    thread_id,
                    &self.vms,
                    &config.outdir,
                    config.skip_trace,
                    config.raw_debug,
                    config.vm.trace.clone(),
                    self.metrics.clone(),
                    trace_length.clone(),
                )
            })
            .collect::<SessionResult<Vec<_>>>()?;

        info!(
            threads = config.threads,
            producers = config.producer_count(),
            skip_trace = config.skip_trace,
            cleanup = config.cleanup_files,
            "Fuzzing started"
        );

        let (dispatch_tx, dispatch_rx) = mpsc::channel::<PathBuf>(DISPATCH_CAPACITY);
        let (cleanup_tx, cleanup_rx) = mpsc::channel(DISPATCH_CAPACITY * 4);
        let (consensus_tx, mut consensus_rx) = mpsc::channel::<PathBuf>(DISPATCH_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);

        let mut producers = JoinSet::new();
        for thread_id in 0..config.producer_count() {
            producers.spawn(produce(
                thread_id,
                self.provider.clone(),
                dispatch_tx.clone(),
                abort.clone(),
            ));
        }
        // The last producer to exit closes the dispatch channel
        drop(dispatch_tx);

        let dispatch_rx = Arc::new(Mutex::new(dispatch_rx));
        let mut workers = JoinSet::new();
        for executor in executors {
            workers.spawn(executor.run(Routes {
                dispatch: dispatch_rx.clone(),
                cleanup: cleanup_tx.clone(),
                consensus: consensus_tx.clone(),
                abort: abort.clone(),
                completed: completed.clone(),
            }));
        }
        drop(cleanup_tx);
        drop(consensus_tx);

        let cleanup = tokio::spawn(cleanup_loop(cleanup_rx, config.cleanup_files));
        let consensus = tokio::spawn(async move {
            let mut found = Vec::new();
            while let Some(path) = consensus_rx.recv().await {
                found.push(path);
            }
            found
        });
        let progress = tokio::spawn(
            Progress {
                completed: completed.clone(),
                counter: self.counter.clone(),
                trace_length: trace_length.clone(),
                vms: self.vms.clone(),
                first_interval: config.progress_interval(),
            }
            .run(done_rx),
        );
        let interrupt = {
            let abort = abort.clone();
            tokio::spawn(async move {
                shutdown.await;
                info!("Waiting for processes to exit");
                abort.store(true, Ordering::SeqCst);
            })
        };

        let mut provider_error: Option<ProviderError> = None;
        while let Some(joined) = producers.join_next().await {
            match joined? {
                Ok(produced) => debug!(produced, "Producer finished"),
                Err(e) => {
                    provider_error.get_or_insert(e);
                }
            }
        }
        let mut report = SessionReport::default();
        while let Some(joined) = workers.join_next().await {
            let stats = joined?;
            report.inconclusive += stats.inconclusive;
            report.skipped += stats.skipped;
        }
        let cleaned = cleanup.await?;
        report.cleaned = cleaned.cleaned;
        report.archived = cleaned.archived;
        report.consensus = consensus.await?;
        report.completed = completed.load(Ordering::SeqCst);
        interrupt.abort();
        let _ = done_tx.send(true);
        progress.await?;

        self.counter.set_session(report.completed);
        if let Err(e) = self.counter.persist() {
            error!(error = %e, "Error saving progress");
        }
        let snapshot = MetricsSnapshot::from_metrics(&self.metrics);
        if let Err(e) = snapshot.write_to(&config.outdir.join(METRICS_FILE)) {
            warn!(error = %e, "Failed writing metrics snapshot");
        }
        info!(
            completed = report.completed,
            inconclusive = report.inconclusive,
            skipped = report.skipped,
            consensus = report.consensus.len(),
            "Session finished"
        );

        if let Some(test) = report.consensus.first().filter(|_| config.rerun_on_consensus) {
            report.consensus_report = self.follow_up(test).await;
        }
        for vm in &self.vms {
            vm.close().await;
        }

        match provider_error {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Re-execute a divergent test into per-VM output files and notify
    async fn follow_up(&self, test: &std::path::Path) -> Option<String> {
        let rerun = run_single_test(&self.vms, test, &self.config.outdir, &self.config.vm.trace).await;
        let block = match rerun {
            Ok(single) => single.render(),
            Err(e) => {
                error!(file = %test.display(), error = %e, "Failed re-executing divergent test");
                return None;
            }
        };
        if let Some(topic) = &self.config.notify_topic {
            if let Err(e) = notify(topic, &block).await {
                warn!(error = %e, "Failed to post notification");
            }
        }
        Some(block)
    }
}

async fn produce(
    thread_id: usize,
    provider: Arc<dyn TestProvider>,
    dispatch: mpsc::Sender<PathBuf>,
    abort: Arc<AtomicBool>,
) -> Result<u64, ProviderError> {
    debug!(thread_id, "Test factory started");
    let mut index = 0u64;
    let result = loop {
        if abort.load(Ordering::SeqCst) {
            break Ok(index);
        }
        match provider.next_test(index, thread_id).await {
            Ok(Some(path)) => {
                if dispatch.send(path).await.is_err() {
                    break Ok(index);
                }
                index += 1;
            }
            Ok(None) => {
                info!(thread_id, "Test provider done, exiting");
                break Ok(index);
            }
            Err(e) => {
                error!(thread_id, error = %e, "Error generating test, exiting");
                abort.store(true, Ordering::SeqCst);
                break Err(e);
            }
        }
    };
    debug!(thread_id, produced = index, "Factory exiting");
    result
}
