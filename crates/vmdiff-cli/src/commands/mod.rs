//! Subcommand implementations. Each returns whether the process should exit cleanly.

pub mod replay;
pub mod roots;
pub mod run;
pub mod speed;

use anyhow::bail;
use std::sync::Arc;
use vmdiff_core::SessionConfig;
use vmdiff_vms::{build_vms, Evm, VmSpec};

/// Build the selected adapters, requiring at least `min` of them
fn build(specs: &[VmSpec], config: &SessionConfig, min: usize) -> anyhow::Result<Vec<Arc<dyn Evm>>> {
    if specs.len() < min {
        bail!("need at least {} vm(s), got {}", min, specs.len());
    }
    Ok(build_vms(specs, &config.vm)?)
}

async fn close(vms: &[Arc<dyn Evm>]) {
    for vm in vms {
        vm.close().await;
    }
}
