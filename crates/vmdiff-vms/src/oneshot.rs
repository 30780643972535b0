//! Adapter spawning one child per test

use crate::client::{parse_state_root, ClientKind, OutputStream, RunMode};
use crate::error::{VmError, VmResult};
use crate::evm::{render_command, Evm, ExecResult, RootResult, TraceSink, VmConfig};
use crate::normalize::{copy_trace, Normalizer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;
use vmdiff_metrics::VmStats;
use vmdiff_trace::JsonlScanner;

/// Spawn-per-test adapter
pub struct OneShotVm {
    kind: ClientKind,
    binary: PathBuf,
    name: String,
    config: VmConfig,
    stats: Arc<VmStats>,
}

impl OneShotVm {
    /// Adapter running `binary` as a `kind` client
    pub fn new(kind: ClientKind, binary: impl Into<PathBuf>, name: impl Into<String>, config: VmConfig) -> Self {
        let stats = Arc::new(VmStats::with_warmup(config.warmup));
        Self {
            kind,
            binary: binary.into(),
            name: name.into(),
            config,
            stats,
        }
    }

    /// Client kind
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    fn args(&self, mode: RunMode, path: &Path) -> VmResult<Vec<String>> {
        self.kind
            .one_shot_args(mode, &path.to_string_lossy())
            .ok_or_else(|| VmError::Unsupported {
                vm: self.name.clone(),
                mode: mode.as_str(),
            })
    }
}

#[async_trait]
impl Evm for OneShotVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance(&self, thread_id: usize) -> Arc<dyn Evm> {
        Arc::new(OneShotVm {
            kind: self.kind,
            binary: self.binary.clone(),
            name: format!("{}-{}", self.name, thread_id),
            config: self.config.clone(),
            stats: self.stats.clone(),
        })
    }

    async fn run_state_test(
        &self,
        path: &Path,
        sink: &mut TraceSink,
        speed_only: bool,
    ) -> VmResult<ExecResult> {
        let mode = RunMode::for_run(speed_only);
        let args = self.args(mode, path)?;
        let command = render_command(&self.binary, &args);
        let stream = self.kind.stream(mode, false);
        debug!(vm = %self.name, cmd = %command, "Running state test");

        let start = Instant::now();
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).stdin(Stdio::null());
        match stream {
            OutputStream::Stdout => cmd.stdout(Stdio::piped()).stderr(Stdio::null()),
            OutputStream::Stderr => cmd.stderr(Stdio::piped()).stdout(Stdio::null()),
        };
        let mut child = cmd.spawn().map_err(|source| VmError::Spawn {
            command: command.clone(),
            source,
        })?;
        let output: Option<Box<dyn AsyncRead + Unpin + Send>> = match stream {
            OutputStream::Stdout => child.stdout.take().map(|s| Box::new(s) as _),
            OutputStream::Stderr => child.stderr.take().map(|s| Box::new(s) as _),
        };
        let output = output.ok_or_else(|| VmError::Pipe {
            command: command.clone(),
            reason: "output not captured".to_string(),
        })?;

        let mut scanner = JsonlScanner::new(BufReader::new(output), self.name.clone());
        let copied = copy_trace(
            &mut scanner,
            sink,
            Normalizer::new(self.kind, self.config.trace.clone()),
        )
        .await;
        // Closing our end unblocks a child we stopped reading from
        scanner.release();
        let status = child.wait().await.map_err(|e| VmError::Pipe {
            command: command.clone(),
            reason: e.to_string(),
        })?;
        let copied = copied?;
        let (exec_time, slow) = self.stats.trace_done(start);

        if !status.success() && !self.kind.tolerates_exit_failure(mode) {
            return Err(VmError::Exit {
                command,
                status: status.to_string(),
            });
        }
        if mode == RunMode::Speed && copied.state_root.is_none() {
            return Err(VmError::MissingStateRoot {
                vm: self.name.clone(),
                command,
            });
        }
        Ok(ExecResult {
            slow,
            exec_time,
            command,
            state_root: copied.state_root,
            steps: copied.steps,
        })
    }

    async fn state_root(&self, path: &Path) -> VmResult<RootResult> {
        let args = self.args(RunMode::Root, path)?;
        let command = render_command(&self.binary, &args);
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| VmError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() && !self.kind.tolerates_exit_failure(RunMode::Root) {
            return Err(VmError::Exit {
                command,
                status: output.status.to_string(),
            });
        }
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        match parse_state_root(self.kind, &combined) {
            Some(root) => Ok(RootResult { root, command }),
            None => {
                tracing::error!(vm = %self.name, cmd = %command, "Failed to find stateroot");
                Err(VmError::MissingStateRoot {
                    vm: self.name.clone(),
                    command,
                })
            }
        }
    }

    async fn close(&self) {}

    fn stats(&self) -> Vec<(&'static str, String)> {
        self.stats.stats()
    }
}
