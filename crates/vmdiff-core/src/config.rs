//! Session configuration

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vmdiff_vms::VmConfig;

/// Settings of a fuzzing or replay session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Executor tasks
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Producer tasks; defaults to half the executors, rounded up
    #[serde(default)]
    pub producers: Option<usize>,
    /// Directory for outputs and reports
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
    /// Compare state roots only
    #[serde(default)]
    pub skip_trace: bool,
    /// Delete tests once executed
    #[serde(default = "default_true")]
    pub cleanup_files: bool,
    /// ntfy.sh topic notified of consensus failures
    #[serde(default)]
    pub notify_topic: Option<String>,
    /// Keep the raw output of disagreeing clients
    #[serde(default)]
    pub raw_debug: bool,
    /// Re-execute a divergent test into per-VM output files after the session
    #[serde(default = "default_true")]
    pub rerun_on_consensus: bool,
    /// First progress report interval in seconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
    /// Cross-run test counter
    #[serde(default = "default_counter_file")]
    pub counter_file: PathBuf,
    /// Adapter settings
    #[serde(default)]
    pub vm: VmConfig,
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_outdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_progress_interval() -> u64 {
    8
}

fn default_counter_file() -> PathBuf {
    PathBuf::from(".fuzzcounter")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            producers: None,
            outdir: default_outdir(),
            skip_trace: false,
            cleanup_files: default_true(),
            notify_topic: None,
            raw_debug: false,
            rerun_on_consensus: default_true(),
            progress_interval_secs: default_progress_interval(),
            counter_file: default_counter_file(),
            vm: VmConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> SessionResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Number of producer tasks
    pub fn producer_count(&self) -> usize {
        self.producers.unwrap_or((self.threads + 1) / 2).max(1)
    }

    /// First progress report interval
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    /// Reject settings no session can run with
    pub fn validate(&self) -> SessionResult<()> {
        if self.threads == 0 {
            return Err(SessionError::Config("at least one executor thread is required".into()));
        }
        if self.producers == Some(0) {
            return Err(SessionError::Config("at least one producer is required".into()));
        }
        Ok(())
    }
}
