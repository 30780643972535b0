//! Integration tests for sessions and runners
//!
//! Tests cover:
//! - Many agreeing tests over several executors and VMs
//! - Exactly one consensus delivery for a divergent test
//! - Inconclusive tests on adapter failure
//! - Provider errors, interrupt handling and the cross-run counter
//! - Single-test, roots and speed runners

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use vmdiff_core::{
    roots_equal, run_single_test, test_speed, FnProvider, ProviderError, Session,
    SessionConfig, SessionError, TestProvider, METRICS_FILE,
};
use vmdiff_metrics::collector::TESTS;
use vmdiff_metrics::{FileCounterStore, GlobalCounter};
use vmdiff_trace::{ComparisonOutcome, RootOutcome, TraceConfig};
use vmdiff_vms::{Evm, ExecResult, RootResult, TraceSink, VmError, VmResult};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Clone)]
struct FakeVm {
    name: String,
    diverge_on: Option<&'static str>,
    fail_on: Option<&'static str>,
    executions: Arc<AtomicU64>,
}

impl FakeVm {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            diverge_on: None,
            fail_on: None,
            executions: Arc::new(AtomicU64::new(0)),
        }
    }

    fn diverging_on(mut self, marker: &'static str) -> Self {
        self.diverge_on = Some(marker);
        self
    }

    fn failing_on(mut self, marker: &'static str) -> Self {
        self.fail_on = Some(marker);
        self
    }

    fn matches(marker: Option<&str>, path: &Path) -> bool {
        marker.is_some_and(|m| path.to_string_lossy().contains(m))
    }

    fn command(&self, path: &Path) -> String {
        format!("{} statetest {}", self.name, path.display())
    }

    fn root(&self, path: &Path) -> &'static str {
        if Self::matches(self.diverge_on, path) {
            "0x02"
        } else {
            "0x01"
        }
    }
}

#[async_trait]
impl Evm for FakeVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance(&self, thread_id: usize) -> Arc<dyn Evm> {
        let mut vm = self.clone();
        vm.name = format!("{}-{}", self.name, thread_id);
        Arc::new(vm)
    }

    async fn run_state_test(
        &self,
        path: &Path,
        sink: &mut TraceSink,
        speed_only: bool,
    ) -> VmResult<ExecResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let command = self.command(path);
        if Self::matches(self.fail_on, path) {
            return Err(VmError::Exit {
                command,
                status: "exit status: 1".into(),
            });
        }
        let gas = if Self::matches(self.diverge_on, path) { 15 } else { 16 };
        let root = self.root(path);
        if !speed_only {
            let step = format!(
                "{{\"depth\":1,\"pc\":0,\"gas\":{},\"op\":\"0x60\",\"opName\":\"PUSH1\",\"stack\":[]}}\n",
                gas
            );
            sink.write_all(step.as_bytes()).await?;
        }
        sink.write_all(format!("{{\"stateRoot\":\"{}\"}}\n", root).as_bytes())
            .await?;
        sink.flush().await?;
        Ok(ExecResult {
            slow: false,
            exec_time: Duration::from_micros(50),
            command,
            state_root: Some(root.to_string()),
            steps: if speed_only { 0 } else { 1 },
        })
    }

    async fn state_root(&self, path: &Path) -> VmResult<RootResult> {
        Ok(RootResult {
            root: self.root(path).to_string(),
            command: self.command(path),
        })
    }

    async fn close(&self) {}

    fn stats(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

fn vms(list: Vec<FakeVm>) -> Vec<Arc<dyn Evm>> {
    list.into_iter().map(|vm| Arc::new(vm) as Arc<dyn Evm>).collect()
}

/// Writes up to `total` tests into `dir`; test number `bad` gets a `bad` name
fn provider(dir: PathBuf, total: u64, bad: Option<u64>) -> Arc<dyn TestProvider> {
    let issued = Arc::new(AtomicU64::new(0));
    Arc::new(FnProvider::new(move |_index, thread_id| {
        let n = issued.fetch_add(1, Ordering::SeqCst);
        if n >= total {
            return Ok(None);
        }
        let kind = if Some(n) == bad { "bad" } else { "ok" };
        let path = dir.join(format!("{:08}-{}-{}.json", n, kind, thread_id));
        std::fs::write(&path, "{}")?;
        Ok(Some(path))
    }))
}

fn config(dir: &TempDir) -> SessionConfig {
    SessionConfig {
        threads: 2,
        outdir: dir.path().join("out"),
        cleanup_files: true,
        counter_file: dir.path().join(".fuzzcounter"),
        ..Default::default()
    }
}

fn tests_dir(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("tests");
    std::fs::create_dir_all(&path).unwrap();
    path
}

async fn never() {
    std::future::pending::<()>().await
}

const LIMIT: Duration = Duration::from_secs(30);

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agreeing_tests_are_all_cleaned() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(
        config(&dir),
        vms(vec![FakeVm::new("a"), FakeVm::new("b"), FakeVm::new("c")]),
        provider(tests_dir(&dir), 100, None),
    )
    .unwrap();
    let metrics = session.metrics();

    let report = tokio::time::timeout(LIMIT, session.run(never()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.completed, 100);
    assert_eq!(report.cleaned, 100);
    assert_eq!(report.inconclusive, 0);
    assert!(report.consensus.is_empty());
    assert_eq!(metrics.get_counter(TESTS), 100);
    assert!(dir.path().join("out").join(METRICS_FILE).exists());

    // Deletion lags one test behind
    let left = std::fs::read_dir(tests_dir(&dir)).unwrap().count();
    assert_eq!(left, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_divergence_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(
        config(&dir),
        vms(vec![
            FakeVm::new("a"),
            FakeVm::new("b"),
            FakeVm::new("c").diverging_on("-bad-"),
        ]),
        provider(tests_dir(&dir), 100, Some(10)),
    )
    .unwrap();

    let report = tokio::time::timeout(LIMIT, session.run(never()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.consensus.len(), 1);
    let divergent = &report.consensus[0];
    assert!(divergent.to_string_lossy().contains("-bad-"));
    assert!(divergent.exists());
    assert!(report.cleaned < 100);
    assert!(report.completed + report.skipped <= 100);

    let block = report.consensus_report.unwrap();
    assert!(block.starts_with("Consensus error\n"));
    assert!(block.contains("tracediff"));
    assert!(dir.path().join("out").join("c-output.jsonl").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_root_mode_divergence() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir);
    cfg.skip_trace = true;
    cfg.rerun_on_consensus = false;
    let session = Session::new(
        cfg,
        vms(vec![FakeVm::new("a"), FakeVm::new("b").diverging_on("-bad-")]),
        provider(tests_dir(&dir), 20, Some(3)),
    )
    .unwrap();

    let report = tokio::time::timeout(LIMIT, session.run(never()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.consensus.len(), 1);
    assert!(report.consensus_report.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_adapter_failure_is_inconclusive() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(
        config(&dir),
        vms(vec![FakeVm::new("a"), FakeVm::new("b").failing_on("-bad-")]),
        provider(tests_dir(&dir), 20, Some(5)),
    )
    .unwrap();

    let report = tokio::time::timeout(LIMIT, session.run(never()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.completed, 20);
    assert_eq!(report.inconclusive, 1);
    assert!(report.consensus.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_provider_error_propagates() {
    let dir = TempDir::new().unwrap();
    let tests = tests_dir(&dir);
    let issued = Arc::new(AtomicU64::new(0));
    let failing = Arc::new(FnProvider::new(move |_index, _thread| {
        let n = issued.fetch_add(1, Ordering::SeqCst);
        if n == 5 {
            return Err(ProviderError::Generator("broken generator".into()));
        }
        let path = tests.join(format!("{:08}.json", n));
        std::fs::write(&path, "{}")?;
        Ok(Some(path))
    }));
    let session = Session::new(
        config(&dir),
        vms(vec![FakeVm::new("a"), FakeVm::new("b")]),
        failing,
    )
    .unwrap();

    let result = tokio::time::timeout(LIMIT, session.run(never())).await.unwrap();
    assert!(matches!(result, Err(SessionError::Provider(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drains_endless_provider() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(
        config(&dir),
        vms(vec![FakeVm::new("a"), FakeVm::new("b"), FakeVm::new("c")]),
        provider(tests_dir(&dir), u64::MAX, None),
    )
    .unwrap();

    let shutdown = tokio::time::sleep(Duration::from_millis(300));
    let report = tokio::time::timeout(LIMIT, session.run(shutdown))
        .await
        .unwrap()
        .unwrap();
    assert!(report.consensus.is_empty());
    assert!(report.completed > 0);
}

#[tokio::test]
async fn test_counter_persists_across_runs() {
    let dir = TempDir::new().unwrap();
    let counter_file = dir.path().join(".fuzzcounter");
    std::fs::write(&counter_file, "5").unwrap();
    let counter = GlobalCounter::open(Box::new(FileCounterStore::new(&counter_file))).unwrap();
    let session = Session::new(
        config(&dir),
        vms(vec![FakeVm::new("a"), FakeVm::new("b")]),
        provider(tests_dir(&dir), 10, None),
    )
    .unwrap()
    .with_counter(counter);

    tokio::time::timeout(LIMIT, session.run(never()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read_to_string(&counter_file).unwrap().trim(), "15");
}

#[test]
fn test_session_needs_two_vms() {
    let dir = TempDir::new().unwrap();
    let result = Session::new(
        config(&dir),
        vms(vec![FakeVm::new("a")]),
        provider(tests_dir(&dir), 1, None),
    );
    assert!(matches!(result, Err(SessionError::Config(_))));
}

// ============================================================================
// Runners
// ============================================================================

#[tokio::test]
async fn test_run_single_test_writes_outputs() {
    let dir = TempDir::new().unwrap();
    let test = tests_dir(&dir).join("00000000-bad-0.json");
    std::fs::write(&test, "{}").unwrap();
    let outdir = dir.path().join("out");
    let list = vms(vec![FakeVm::new("geth-0"), FakeVm::new("besu-0").diverging_on("-bad-")]);

    let report = run_single_test(&list, &test, &outdir, &TraceConfig::default())
        .await
        .unwrap();
    assert!(!report.is_agree());
    match &report.outcome {
        ComparisonOutcome::Divergent(d) => {
            assert_eq!(d.step, 0);
            assert_eq!(d.fields, vec!["gas"]);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(outdir.join("geth-0-output.jsonl").exists());
    let block = report.render();
    assert!(block.contains(&format!(
        "\ttracediff {} {}",
        outdir.join("geth-0-output.jsonl").display(),
        outdir.join("besu-0-output.jsonl").display()
    )));
}

#[tokio::test]
async fn test_roots_equal() {
    let dir = TempDir::new().unwrap();
    let test = tests_dir(&dir).join("t-bad.json");
    std::fs::write(&test, "{}").unwrap();
    let list = vms(vec![
        FakeVm::new("a"),
        FakeVm::new("b"),
        FakeVm::new("c").diverging_on("-bad"),
    ]);

    let report = roots_equal(&list, &test).await.unwrap();
    assert_eq!(
        report.outcome,
        RootOutcome::Disagree {
            reference: "0x01".into(),
            mismatched: vec![2],
        }
    );
    assert_eq!(report.roots[1].0, "b");
}

#[tokio::test]
async fn test_speed_runs_every_pair() {
    let dir = TempDir::new().unwrap();
    let tests = tests_dir(&dir);
    std::fs::write(tests.join("a.json"), "{}").unwrap();
    std::fs::create_dir_all(tests.join("nested")).unwrap();
    std::fs::write(tests.join("nested").join("b.json"), "{}").unwrap();
    let failing = FakeVm::new("y").failing_on("b.json");
    let list = vms(vec![FakeVm::new("x"), failing]);

    let samples = test_speed(&list, &tests).await.unwrap();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.exec_time < Duration::from_secs(1)));
}
