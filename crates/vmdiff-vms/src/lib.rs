//! # vmdiff-vms
//!
//! Adapters driving external EVM binaries.
//!
//! This crate provides:
//! - The [`Evm`] trait shared by all adapters
//! - Per-client command lines, output streams and state-root extraction
//! - Spawn-per-test and long-lived batch adapters
//! - Normalization of client output into canonical trace lines

#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod client;
mod error;
mod evm;
mod normalize;
mod oneshot;
mod registry;

pub use batch::BatchVm;
pub use client::{parse_state_root, ClientKind, OutputStream, RootMarker, RunMode};
pub use error::{VmError, VmResult};
pub use evm::{Evm, ExecResult, RootResult, TraceSink, VmConfig};
pub use normalize::{copy_trace, copy_until_end, Copied, Normalizer};
pub use oneshot::OneShotVm;
pub use registry::{build_vm, build_vms, resolve_binary, VmSpec};
