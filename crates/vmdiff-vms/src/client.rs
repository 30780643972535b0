//! Per-client invocation quirks
//!
//! Every supported EVM binary differs in flags, in which stream carries the trace, in
//! how it reports the state root and in what its exit code means. Those differences
//! live here, in one closed set of variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use vmdiff_trace::TraceLine;

/// Supported EVM implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// go-ethereum `evm`
    Geth,
    /// Ethereum execution specs `ethereum-spec-evm`
    Eels,
    /// Erigon `evm`
    Erigon,
    /// Nimbus `evmstate`
    Nimbus,
    /// Besu `evmtool`
    Besu,
    /// Nethermind `nethtest`
    Nethermind,
    /// revm `revme`
    Revm,
}

/// What a run is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Full per-opcode trace
    Trace,
    /// Execution without tracing, final root only
    Speed,
    /// State root query
    Root,
}

impl RunMode {
    /// Mode for a `run_state_test` call
    pub fn for_run(speed_only: bool) -> Self {
        if speed_only {
            RunMode::Speed
        } else {
            RunMode::Trace
        }
    }

    /// Human readable name
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Trace => "tracing",
            RunMode::Speed => "speed mode",
            RunMode::Root => "state root mode",
        }
    }
}

/// Child output stream carrying the data of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Literal marker preceding a state root in free-form output
#[derive(Debug, Clone, Copy)]
pub struct RootMarker {
    /// Text right before the root
    pub marker: &'static str,
    /// Length of the root following the marker
    pub len: usize,
    /// Whether the root carries its own `0x`
    pub prefixed: bool,
}

const QUOTED_SPACED: RootMarker = RootMarker {
    marker: r#""stateRoot": ""#,
    len: 66,
    prefixed: true,
};

const QUOTED: RootMarker = RootMarker {
    marker: r#""stateRoot":""#,
    len: 66,
    prefixed: true,
};

const POST_HASH: RootMarker = RootMarker {
    marker: r#""postHash":""#,
    len: 66,
    prefixed: true,
};

const NIMBUS_MISMATCH: RootMarker = RootMarker {
    marker: "post state root mismatch: got ",
    len: 64,
    prefixed: false,
};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn with_path(list: &[&str], path: &str) -> Vec<String> {
    let mut out = args(list);
    out.push(path.to_string());
    out
}

impl ClientKind {
    /// All clients
    pub const ALL: [ClientKind; 7] = [
        ClientKind::Geth,
        ClientKind::Eels,
        ClientKind::Erigon,
        ClientKind::Nimbus,
        ClientKind::Besu,
        ClientKind::Nethermind,
        ClientKind::Revm,
    ];

    /// Command line flag selecting this client; also the prefix of adapter names
    pub fn flag(self, batch: bool) -> &'static str {
        match (self, batch) {
            (ClientKind::Geth, false) => "geth",
            (ClientKind::Geth, true) => "gethbatch",
            (ClientKind::Eels, false) => "eels",
            (ClientKind::Eels, true) => "eelsbatch",
            (ClientKind::Erigon, false) => "erigon",
            (ClientKind::Erigon, true) => "erigonbatch",
            (ClientKind::Nimbus, false) => "nimbus",
            (ClientKind::Nimbus, true) => "nimbusbatch",
            (ClientKind::Besu, false) => "besu",
            (ClientKind::Besu, true) => "besubatch",
            (ClientKind::Nethermind, false) => "nethermind",
            (ClientKind::Nethermind, true) => "nethbatch",
            (ClientKind::Revm, _) => "revme",
        }
    }

    /// Whether the client can read test paths from stdin
    pub fn supports_batch(self) -> bool {
        !matches!(self, ClientKind::Revm)
    }

    /// Whether the client may print a step prematurely and then again with the error
    pub fn coalesces_duplicates(self) -> bool {
        matches!(
            self,
            ClientKind::Geth | ClientKind::Eels | ClientKind::Erigon | ClientKind::Nimbus
        )
    }

    /// Whether a nonzero exit status is expected in `mode`
    pub fn tolerates_exit_failure(self, mode: RunMode) -> bool {
        match self {
            // Signals a post-state mismatch through the exit code
            ClientKind::Nimbus => mode == RunMode::Root,
            ClientKind::Nethermind => mode == RunMode::Trace,
            _ => false,
        }
    }

    /// Arguments for running a single test; `None` if the mode is unsupported.
    pub fn one_shot_args(self, mode: RunMode, path: &str) -> Option<Vec<String>> {
        use RunMode::*;
        let list = match (self, mode) {
            (ClientKind::Geth | ClientKind::Erigon, Trace) => {
                with_path(&["--json", "--noreturndata", "--nomemory", "statetest"], path)
            }
            (ClientKind::Geth | ClientKind::Erigon, Speed) => {
                with_path(&["--nomemory", "--noreturndata", "--nostack", "statetest"], path)
            }
            (ClientKind::Geth | ClientKind::Erigon, Root) => with_path(&["statetest"], path),
            (ClientKind::Eels, Trace) => {
                with_path(&["statetest", "--json", "--noreturndata", "--nomemory"], path)
            }
            (ClientKind::Eels, Speed) => {
                with_path(&["statetest", "--nomemory", "--noreturndata", "--nostack"], path)
            }
            (ClientKind::Eels, Root) => with_path(&["statetest"], path),
            (ClientKind::Nimbus, Trace) => with_path(
                &["--json", "--noreturndata", "--nomemory", "--nostorage"],
                path,
            ),
            (ClientKind::Nimbus, Speed) => {
                with_path(&["--noreturndata", "--nomemory", "--nostorage"], path)
            }
            (ClientKind::Nimbus, Root) => with_path(&[], path),
            (ClientKind::Besu, Trace) => {
                with_path(&["--nomemory", "--notime", "--json", "state-test"], path)
            }
            (ClientKind::Besu, Speed | Root) => {
                with_path(&["--nomemory", "--notime", "state-test"], path)
            }
            (ClientKind::Nethermind, Trace) => {
                vec!["--input".into(), path.into(), "--trace".into(), "-m".into()]
            }
            (ClientKind::Nethermind, Speed) => return None,
            (ClientKind::Nethermind, Root) => with_path(&["-m", "-s", "-i"], path),
            (ClientKind::Revm, Trace | Speed) => with_path(&["statetest", "--json"], path),
            (ClientKind::Revm, Root) => with_path(&["statetest"], path),
        };
        Some(list)
    }

    /// Arguments for a long-lived child reading paths from stdin
    pub fn batch_args(self, mode: RunMode) -> Option<Vec<String>> {
        use RunMode::*;
        let list: &[&str] = match (self, mode) {
            (ClientKind::Geth | ClientKind::Erigon, Trace) => {
                &["--json", "--noreturndata", "--nomemory", "statetest"]
            }
            (ClientKind::Geth | ClientKind::Erigon, Speed) => {
                &["--nomemory", "--noreturndata", "--nostack", "statetest"]
            }
            (ClientKind::Geth | ClientKind::Erigon, Root) => &["statetest"],
            (ClientKind::Eels, Trace) => &["statetest", "--json", "--noreturndata", "--nomemory"],
            (ClientKind::Eels, Speed) => &["statetest", "--nomemory", "--noreturndata", "--nostack"],
            (ClientKind::Eels, Root) => &["statetest"],
            (ClientKind::Nimbus, Trace) => &["--json", "--noreturndata", "--nomemory", "--nostorage"],
            (ClientKind::Nimbus, Speed | Root) => &["--noreturndata", "--nomemory", "--nostorage"],
            (ClientKind::Besu, Trace) => &["--nomemory", "--json", "state-test"],
            (ClientKind::Besu, Speed | Root) => &["--nomemory", "state-test"],
            (ClientKind::Nethermind, Trace) => &["-x", "--trace", "-m"],
            (ClientKind::Nethermind, Speed) => &["-x", "-m", "--neverTrace"],
            (ClientKind::Nethermind, Root) => &["--neverTrace", "-m", "-s", "-x"],
            (ClientKind::Revm, _) => return None,
        };
        Some(args(list))
    }

    /// Stream to read in `mode`
    pub fn stream(self, mode: RunMode, batch: bool) -> OutputStream {
        match self {
            ClientKind::Besu => OutputStream::Stdout,
            ClientKind::Nethermind if mode != RunMode::Trace => OutputStream::Stdout,
            ClientKind::Geth | ClientKind::Erigon if batch && mode == RunMode::Root => {
                OutputStream::Stdout
            }
            _ => OutputStream::Stderr,
        }
    }

    /// Free-form markers tried when no json line carries the root
    pub fn root_markers(self) -> &'static [RootMarker] {
        match self {
            ClientKind::Besu => &[POST_HASH, QUOTED],
            ClientKind::Nethermind => &[QUOTED, QUOTED_SPACED],
            ClientKind::Nimbus => &[QUOTED_SPACED, NIMBUS_MISMATCH],
            _ => &[QUOTED_SPACED, QUOTED],
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag(false))
    }
}

/// Find the state root in the combined output of a client: first as a json line,
/// then through the client's literal markers.
pub fn parse_state_root(kind: ClientKind, output: &[u8]) -> Option<String> {
    for line in output.split(|b| *b == b'\n') {
        let line = line.trim_ascii();
        if line.first() != Some(&b'{') {
            continue;
        }
        if let Ok(parsed) = serde_json::from_slice::<TraceLine>(line) {
            if parsed.depth() == 0 {
                if let Some(root) = parsed.state_root() {
                    return Some(root.to_string());
                }
            }
        }
    }
    let text = String::from_utf8_lossy(output);
    for m in kind.root_markers() {
        if let Some(idx) = text.find(m.marker) {
            let start = idx + m.marker.len();
            if let Some(root) = text.get(start..start + m.len) {
                let root = root.to_ascii_lowercase();
                return Some(if m.prefixed { root } else { format!("0x{}", root) });
            }
        }
    }
    None
}
