//! Construction of adapters from command-line selections

use crate::batch::BatchVm;
use crate::client::ClientKind;
use crate::error::{VmError, VmResult};
use crate::evm::{Evm, VmConfig};
use crate::oneshot::OneShotVm;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One selected VM binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    /// Client family
    pub kind: ClientKind,
    /// Path or bare name of the binary
    pub binary: PathBuf,
    /// Feed tests over stdin to a long-lived child
    pub batch: bool,
    /// Position among binaries given for the same flag
    pub index: usize,
}

impl VmSpec {
    /// Adapter name: `<flag>-<index>`
    pub fn name(&self) -> String {
        format!("{}-{}", self.kind.flag(self.batch), self.index)
    }
}

/// Locate `binary`, searching `PATH` for bare names
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 || binary.is_absolute() {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Build the adapter for `spec`
pub fn build_vm(spec: &VmSpec, config: &VmConfig) -> VmResult<Arc<dyn Evm>> {
    let binary = resolve_binary(&spec.binary)
        .ok_or_else(|| VmError::MissingBinary(spec.binary.display().to_string()))?;
    let name = spec.name();
    tracing::info!(vm = %name, binary = %binary.display(), "Added VM");
    if spec.batch {
        Ok(Arc::new(BatchVm::new(spec.kind, binary, name, config.clone())?))
    } else {
        Ok(Arc::new(OneShotVm::new(spec.kind, binary, name, config.clone())))
    }
}

/// Build adapters for every spec, failing on the first unusable one
pub fn build_vms(specs: &[VmSpec], config: &VmConfig) -> VmResult<Vec<Arc<dyn Evm>>> {
    specs.iter().map(|spec| build_vm(spec, config)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_name() {
        let spec = VmSpec {
            kind: ClientKind::Nethermind,
            binary: PathBuf::from("nethtest"),
            batch: true,
            index: 1,
        };
        assert_eq!(spec.name(), "nethbatch-1");
    }

    #[test]
    fn test_missing_binary() {
        let spec = VmSpec {
            kind: ClientKind::Geth,
            binary: PathBuf::from("/nonexistent/dir/evm"),
            batch: false,
            index: 0,
        };
        let err = build_vm(&spec, &VmConfig::default()).err().unwrap();
        assert!(matches!(err, VmError::MissingBinary(_)));
    }

    #[test]
    fn test_revm_has_no_batch_mode() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("revme");
        std::fs::write(&binary, b"").unwrap();
        let spec = VmSpec {
            kind: ClientKind::Revm,
            binary,
            batch: true,
            index: 0,
        };
        let err = build_vm(&spec, &VmConfig::default()).err().unwrap();
        assert!(matches!(err, VmError::Unsupported { .. }));
    }
}
