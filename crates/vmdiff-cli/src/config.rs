//! Command-line selection of VMs and session settings

use crate::Cli;
use clap::Args;
use std::path::PathBuf;
use vmdiff_core::SessionConfig;
use vmdiff_vms::{ClientKind, VmSpec};

/// Per-client binary flags; each may be given several times
#[derive(Args, Debug, Default)]
pub struct VmArgs {
    /// go-ethereum `evm` binary
    #[arg(long, global = true, value_name = "BIN")]
    pub geth: Vec<PathBuf>,
    /// go-ethereum `evm` binary, batch mode
    #[arg(long, global = true, value_name = "BIN")]
    pub gethbatch: Vec<PathBuf>,
    /// Ethereum execution specs binary
    #[arg(long, global = true, value_name = "BIN")]
    pub eels: Vec<PathBuf>,
    /// Ethereum execution specs binary, batch mode
    #[arg(long, global = true, value_name = "BIN")]
    pub eelsbatch: Vec<PathBuf>,
    /// Erigon `evm` binary
    #[arg(long, global = true, value_name = "BIN")]
    pub erigon: Vec<PathBuf>,
    /// Erigon `evm` binary, batch mode
    #[arg(long, global = true, value_name = "BIN")]
    pub erigonbatch: Vec<PathBuf>,
    /// Nimbus `evmstate` binary
    #[arg(long, global = true, value_name = "BIN")]
    pub nimbus: Vec<PathBuf>,
    /// Nimbus `evmstate` binary, batch mode
    #[arg(long, global = true, value_name = "BIN")]
    pub nimbusbatch: Vec<PathBuf>,
    /// Besu `evmtool` binary
    #[arg(long, global = true, value_name = "BIN")]
    pub besu: Vec<PathBuf>,
    /// Besu `evmtool` binary, batch mode
    #[arg(long, global = true, value_name = "BIN")]
    pub besubatch: Vec<PathBuf>,
    /// Nethermind `nethtest` binary
    #[arg(long, global = true, value_name = "BIN")]
    pub nethermind: Vec<PathBuf>,
    /// Nethermind `nethtest` binary, batch mode
    #[arg(long, global = true, value_name = "BIN")]
    pub nethbatch: Vec<PathBuf>,
    /// revm `revme` binary
    #[arg(long, global = true, value_name = "BIN")]
    pub revme: Vec<PathBuf>,
}

impl VmArgs {
    fn binaries(&self, kind: ClientKind, batch: bool) -> &[PathBuf] {
        match (kind, batch) {
            (ClientKind::Geth, false) => &self.geth,
            (ClientKind::Geth, true) => &self.gethbatch,
            (ClientKind::Eels, false) => &self.eels,
            (ClientKind::Eels, true) => &self.eelsbatch,
            (ClientKind::Erigon, false) => &self.erigon,
            (ClientKind::Erigon, true) => &self.erigonbatch,
            (ClientKind::Nimbus, false) => &self.nimbus,
            (ClientKind::Nimbus, true) => &self.nimbusbatch,
            (ClientKind::Besu, false) => &self.besu,
            (ClientKind::Besu, true) => &self.besubatch,
            (ClientKind::Nethermind, false) => &self.nethermind,
            (ClientKind::Nethermind, true) => &self.nethbatch,
            (ClientKind::Revm, false) => &self.revme,
            (ClientKind::Revm, true) => &[],
        }
    }

    /// Selected VMs in flag order; the first one is the comparison reference
    pub fn specs(&self) -> Vec<VmSpec> {
        let mut specs = Vec::new();
        for kind in ClientKind::ALL {
            for batch in [false, true] {
                for (index, binary) in self.binaries(kind, batch).iter().enumerate() {
                    specs.push(VmSpec {
                        kind,
                        binary: binary.clone(),
                        batch,
                        index,
                    });
                }
            }
        }
        specs
    }
}

/// Session settings: the `--config` file if given, overridden by flags
pub fn session_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(threads) = cli.parallel {
        config.threads = threads;
    }
    if let Some(outdir) = &cli.outdir {
        config.outdir = outdir.clone();
    }
    if let Some(topic) = &cli.ntfy {
        config.notify_topic = Some(topic.clone());
    }
    if let Some(cleanup) = cli.cleanup_files {
        config.cleanup_files = cleanup;
    }
    config.skip_trace |= cli.skiptrace;
    config.raw_debug |= cli.rawdebug;
    config.validate()?;
    Ok(config)
}
