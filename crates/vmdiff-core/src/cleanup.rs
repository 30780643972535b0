//! Post-execution handling of test files

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// What to do with an executed test
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CleanupTask {
    /// Test is done with; delete it if configured
    Remove(PathBuf),
    /// Test was slow; keep a `slowtest-` copy next to it
    Slow(PathBuf),
}

/// Counts reported by the cleanup task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CleanupStats {
    pub cleaned: u64,
    pub archived: u64,
}

/// Path of the archived copy of a slow test
pub fn slow_test_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("slowtest-{}", name))
}

/// Drain `rx` until every sender is gone. Deletion lags one test behind so the most
/// recent file is always left on disk.
pub(crate) async fn cleanup_loop(
    mut rx: mpsc::Receiver<CleanupTask>,
    delete_files: bool,
) -> CleanupStats {
    let mut stats = CleanupStats::default();
    let mut to_remove: Option<PathBuf> = None;
    while let Some(task) = rx.recv().await {
        match task {
            CleanupTask::Slow(path) => {
                let target = slow_test_path(&path);
                match tokio::fs::copy(&path, &target).await {
                    Ok(_) => stats.archived += 1,
                    Err(e) => error!(file = %path.display(), error = %e, "Error copying file"),
                }
            }
            CleanupTask::Remove(path) => {
                stats.cleaned += 1;
                if let Some(previous) = to_remove.take() {
                    if let Err(e) = tokio::fs::remove_file(&previous).await {
                        error!(file = %previous.display(), error = %e, "Error deleting file");
                    }
                }
                if delete_files {
                    to_remove = Some(path);
                }
            }
        }
    }
    debug!(cleaned = stats.cleaned, archived = stats.archived, "Cleanup loop exiting");
    stats
}
