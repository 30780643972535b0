//! Uniform contract over external EVM binaries

use crate::error::VmResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use vmdiff_metrics::DEFAULT_WARMUP;
use vmdiff_trace::TraceConfig;

/// Output sink for canonical trace lines
pub type TraceSink = dyn AsyncWrite + Unpin + Send;

/// Adapter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Executions before a new longest run counts as slow
    pub warmup: u64,
    /// Canonical trace settings
    pub trace: TraceConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            warmup: DEFAULT_WARMUP,
            trace: TraceConfig::default(),
        }
    }
}

/// Outcome of one `run_state_test`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Run was a new longest after warm-up
    pub slow: bool,
    /// Wall clock execution time
    pub exec_time: Duration,
    /// Literal command line
    pub command: String,
    /// Root reported by the client
    pub state_root: Option<String>,
    /// Canonical steps written to the sink
    pub steps: u64,
}

/// Outcome of one `state_root`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootResult {
    /// Post state root
    pub root: String,
    /// Literal command line
    pub command: String,
}

/// An external EVM implementation
#[async_trait]
pub trait Evm: Send + Sync {
    /// Stable identity, suffixed with the thread index for per-thread instances
    fn name(&self) -> &str;

    /// Adapter bound to worker `thread_id`, sharing this adapter's statistics
    fn instance(&self, thread_id: usize) -> Arc<dyn Evm>;

    /// Run the test at `path`. In full mode the normalized trace and a terminal line
    /// are written to `sink`; in speed mode tracing is disabled.
    async fn run_state_test(
        &self,
        path: &Path,
        sink: &mut TraceSink,
        speed_only: bool,
    ) -> VmResult<ExecResult>;

    /// Execute without tracing and report the post state root
    async fn state_root(&self, path: &Path) -> VmResult<RootResult>;

    /// Release any child process
    async fn close(&self);

    /// Rolling execution statistics
    fn stats(&self) -> Vec<(&'static str, String)>;
}

/// Render a command line the way a shell would show it
pub(crate) fn render_command(binary: &Path, args: &[String]) -> String {
    let mut command = binary.display().to_string();
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}
