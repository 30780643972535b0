//! # vmdiff-trace
//!
//! Per-instruction EVM traces for differential testing.
//!
//! This crate provides:
//! - The canonical [`TraceRecord`] and its compact jsonl encoding
//! - A lenient parser for the json dialects of the supported clients
//! - A pooled-buffer jsonl scanner
//! - An online N-way comparator for trace streams and state roots

#![warn(missing_docs)]
#![warn(clippy::all)]

mod compare;
mod error;
mod opcode;
mod record;
mod scanner;

pub use compare::{
    compare_roots, diff_fields, Agreement, Comparator, ComparisonOutcome, Divergence,
    RootOutcome, StepSource, StreamItem, TraceReader,
};
pub use error::{CompareError, TraceError, TraceResult};
pub use opcode::{opcode_name, Opcode};
pub use record::{format_u256, terminal_line, TerminalRecord, TraceConfig, TraceLine, TraceRecord};
pub use scanner::{BufferPool, DiagnosticSink, JsonlScanner, LogSink, MemorySink, MAX_LINE_SIZE};

pub use primitive_types::U256;
