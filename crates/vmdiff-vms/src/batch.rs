//! Adapter feeding test paths to a long-lived child over stdin

use crate::client::{ClientKind, OutputStream, RunMode};
use crate::error::{VmError, VmResult};
use crate::evm::{render_command, Evm, ExecResult, RootResult, TraceSink, VmConfig};
use crate::normalize::{copy_until_end, Copied, Normalizer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vmdiff_metrics::VmStats;
use vmdiff_trace::JsonlScanner;

/// A running batch child
struct BatchProcess {
    child: Child,
    stdin: ChildStdin,
    output: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    command: String,
    mode: RunMode,
}

impl BatchProcess {
    async fn submit(&mut self, path: &Path) -> VmResult<()> {
        let line = format!("{}\n", path.display());
        let written = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await
        }
        .await;
        written.map_err(|e| VmError::Pipe {
            command: self.command.clone(),
            reason: e.to_string(),
        })
    }

    /// Close stdin and wait for the child to exit
    async fn shutdown(self) {
        let BatchProcess {
            mut child,
            stdin,
            command,
            ..
        } = self;
        drop(stdin);
        match child.wait().await {
            Ok(status) => debug!(cmd = %command, %status, "Batch process exited"),
            Err(e) => warn!(cmd = %command, error = %e, "Failed waiting for batch process"),
        }
    }
}

/// Batch adapter; one child per instance, started on first use
pub struct BatchVm {
    kind: ClientKind,
    binary: PathBuf,
    name: String,
    config: VmConfig,
    stats: Arc<VmStats>,
    process: Mutex<Option<BatchProcess>>,
}

impl BatchVm {
    /// Adapter running `binary` as a `kind` batch client
    pub fn new(
        kind: ClientKind,
        binary: impl Into<PathBuf>,
        name: impl Into<String>,
        config: VmConfig,
    ) -> VmResult<Self> {
        let name = name.into();
        if !kind.supports_batch() {
            return Err(VmError::Unsupported {
                vm: name,
                mode: "batch mode",
            });
        }
        let stats = Arc::new(VmStats::with_warmup(config.warmup));
        Ok(Self {
            kind,
            binary: binary.into(),
            name,
            config,
            stats,
            process: Mutex::new(None),
        })
    }

    fn start(&self, mode: RunMode) -> VmResult<BatchProcess> {
        let args = self.kind.batch_args(mode).ok_or_else(|| VmError::Unsupported {
            vm: self.name.clone(),
            mode: mode.as_str(),
        })?;
        let command = render_command(&self.binary, &args);
        let stream = self.kind.stream(mode, true);
        debug!(vm = %self.name, cmd = %command, "Starting batch process");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).stdin(Stdio::piped()).kill_on_drop(true);
        match stream {
            OutputStream::Stdout => cmd.stdout(Stdio::piped()).stderr(Stdio::null()),
            OutputStream::Stderr => cmd.stderr(Stdio::piped()).stdout(Stdio::null()),
        };
        let mut child = cmd.spawn().map_err(|source| VmError::Spawn {
            command: command.clone(),
            source,
        })?;
        let pipe_error = |what: &str| VmError::Pipe {
            command: command.clone(),
            reason: format!("{} not captured", what),
        };
        let stdin = child.stdin.take().ok_or_else(|| pipe_error("stdin"))?;
        let output: Box<dyn AsyncRead + Unpin + Send> = match stream {
            OutputStream::Stdout => Box::new(child.stdout.take().ok_or_else(|| pipe_error("stdout"))?),
            OutputStream::Stderr => Box::new(child.stderr.take().ok_or_else(|| pipe_error("stderr"))?),
        };
        Ok(BatchProcess {
            child,
            stdin,
            output: BufReader::new(output),
            command,
            mode,
        })
    }

    /// Run one test through the child for `mode`, restarting it if it was started for
    /// another mode. Returns the copy outcome and the command line.
    async fn execute(
        &self,
        path: &Path,
        sink: &mut TraceSink,
        mode: RunMode,
    ) -> VmResult<(Copied, String)> {
        let mut guard = self.process.lock().await;
        let mut process = match guard.take() {
            Some(process) if process.mode == mode => process,
            previous => {
                if let Some(previous) = previous {
                    previous.shutdown().await;
                }
                self.start(mode)?
            }
        };
        process.submit(path).await?;

        let mut scanner = JsonlScanner::new(&mut process.output, self.name.clone());
        let copied = copy_until_end(
            &mut scanner,
            sink,
            Normalizer::new(self.kind, self.config.trace.clone()),
        )
        .await;
        scanner.release();

        // A failed child is dropped (and killed); the next test starts a new one
        let command = process.command.clone();
        match copied? {
            Some(copied) => {
                *guard = Some(process);
                Ok((copied, command))
            }
            None => Err(VmError::Truncated { command }),
        }
    }
}

#[async_trait]
impl Evm for BatchVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance(&self, thread_id: usize) -> Arc<dyn Evm> {
        Arc::new(BatchVm {
            kind: self.kind,
            binary: self.binary.clone(),
            name: format!("{}-{}", self.name, thread_id),
            config: self.config.clone(),
            stats: self.stats.clone(),
            process: Mutex::new(None),
        })
    }

    async fn run_state_test(
        &self,
        path: &Path,
        sink: &mut TraceSink,
        speed_only: bool,
    ) -> VmResult<ExecResult> {
        let mode = RunMode::for_run(speed_only);
        let start = Instant::now();
        let (copied, command) = self.execute(path, sink, mode).await?;
        let (exec_time, slow) = self.stats.trace_done(start);
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
        let mut discard = tokio::io::sink();
        let (copied, command) = self.execute(path, &mut discard, RunMode::Root).await?;
        match copied.state_root {
            Some(root) => Ok(RootResult { root, command }),
            None => Err(VmError::MissingStateRoot {
                vm: self.name.clone(),
                command,
            }),
        }
    }

    async fn close(&self) {
        if let Some(process) = self.process.lock().await.take() {
            process.shutdown().await;
        }
    }

    fn stats(&self) -> Vec<(&'static str, String)> {
        self.stats.stats()
    }
}
