//! Reading, writing and discovering state test files

use crate::error::{StateTestError, StateTestResult};
use crate::types::StateTestFile;
use std::path::{Path, PathBuf};

/// File name of a generated test: `<index:08>-<name>-<thread>.json`
pub fn test_file_name(index: u64, name: &str, thread: usize) -> String {
    format!("{:08}-{}-{}.json", index, name, thread)
}

/// Write `file` as `<dir>/<file_name>` and return the path
pub fn store_test(dir: &Path, file_name: &str, file: &StateTestFile) -> StateTestResult<PathBuf> {
    if file_name.is_empty() || file_name.contains(|c: char| c == '/' || c == '\\') {
        return Err(StateTestError::InvalidName(file_name.to_string()));
    }
    let path = dir.join(file_name);
    let data = serde_json::to_vec(file)?;
    std::fs::write(&path, data)?;
    tracing::trace!(path = %path.display(), "Stored state test");
    Ok(path)
}

/// Parse a state test file
pub fn load_test(path: &Path) -> StateTestResult<StateTestFile> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// All `.json` files below `dir`, sorted. A missing directory yields nothing.
pub fn find_tests(dir: &Path) -> StateTestResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    if dir.is_file() {
        found.push(dir.to_path_buf());
        return Ok(found);
    }
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Directory not found");
        return Ok(found);
    }
    collect(dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect(dir: &Path, found: &mut Vec<PathBuf>) -> StateTestResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(&path, found)?;
        } else if path.extension().is_some_and(|e| e == "json") {
            found.push(path);
        }
    }
    Ok(())
}
