//! Trace records and their canonical jsonl encoding
//!
//! Every client prints its own dialect of the geth `StructLog` json. [`TraceLine`]
//! accepts all of them, [`TraceRecord`] is the normalized step, and [`TraceConfig`]
//! writes the compact canonical line the comparator reads back.

use crate::opcode::opcode_name;
use primitive_types::U256;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Write;

/// One EVM execution step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceRecord {
    /// Program counter
    pub pc: u64,
    /// Opcode byte
    pub op: u8,
    /// Gas remaining before the step
    pub gas: u64,
    /// Gas cost of the step
    pub gas_cost: u64,
    /// Memory size in bytes
    pub memory_size: u64,
    /// Stack, top element last
    pub stack: Vec<U256>,
    /// Return data of the last call
    pub return_data: Option<Vec<u8>>,
    /// Call depth; zero marks a line that was not an opcode
    pub depth: u64,
    /// Refund counter
    pub refund: u64,
    /// Error reported for this step
    pub error: Option<String>,
}

impl TraceRecord {
    /// Opcode mnemonic
    pub fn op_name(&self) -> Cow<'static, str> {
        opcode_name(self.op)
    }

    /// Whether this is an actual opcode step (depth >= 1)
    pub fn is_step(&self) -> bool {
        self.depth > 0
    }

    /// Whether this is a STOP, which some clients synthesize at end of code
    pub fn is_stop(&self) -> bool {
        self.op == 0x00
    }

    /// Whether `other` describes the same instruction (premature flush followed by
    /// the corrected record)
    pub fn same_position(&self, other: &TraceRecord) -> bool {
        self.pc == other.pc && self.depth == other.depth
    }

    /// Fold a duplicate record for the same position into this one.
    pub fn merge(&mut self, later: TraceRecord) {
        if self.error.is_none() {
            self.error = later.error;
        }
    }

    /// One-line human friendly rendering
    pub fn summary(&self) -> String {
        format!(
            "pc: {:3} op: {:>18} depth: {:2} gas: {:5} stack size {}",
            self.pc,
            self.op_name(),
            self.depth,
            self.gas,
            self.stack.len()
        )
    }
}

/// Sentinel closing a trace stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRecord {
    /// Post state root, if the client reported one
    #[serde(rename = "stateRoot", default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<String>,
}

impl TerminalRecord {
    /// Terminal record with a root
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            state_root: Some(root.into()),
        }
    }
}

/// Lenient deserialization target for one line of client output.
#[derive(Debug, Default, Deserialize)]
pub struct TraceLine {
    #[serde(default, deserialize_with = "lenient_u64")]
    pc: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u8")]
    op: Option<u8>,
    #[serde(default, deserialize_with = "lenient_u64")]
    gas: Option<u64>,
    #[serde(default, rename = "gasCost", deserialize_with = "lenient_u64")]
    gas_cost: Option<u64>,
    #[serde(
        default,
        rename = "memSize",
        alias = "memorySize",
        deserialize_with = "lenient_u64"
    )]
    mem_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_stack")]
    stack: Option<Vec<U256>>,
    #[serde(default, rename = "returnData", deserialize_with = "lenient_bytes")]
    return_data: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "lenient_u64")]
    depth: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    refund: Option<u64>,
    #[serde(default, deserialize_with = "lenient_error")]
    error: Option<String>,
    /// Root as printed by geth, eels, revm and nethermind
    #[serde(default, rename = "stateRoot")]
    state_root: Option<String>,
    /// Root as printed by besu
    #[serde(default, rename = "postHash")]
    post_hash: Option<String>,
}

impl TraceLine {
    /// Final state root carried by this line, under either key
    pub fn state_root(&self) -> Option<&str> {
        [self.state_root.as_deref(), self.post_hash.as_deref()]
            .into_iter()
            .flatten()
            .find(|root| !root.is_empty())
    }

    /// Call depth; zero when absent
    pub fn depth(&self) -> u64 {
        self.depth.unwrap_or(0)
    }

    /// Convert into a trace record. Lines without a depth become depth-0 records.
    pub fn into_record(self) -> TraceRecord {
        TraceRecord {
            pc: self.pc.unwrap_or(0),
            op: self.op.unwrap_or(0),
            gas: self.gas.unwrap_or(0),
            gas_cost: self.gas_cost.unwrap_or(0),
            memory_size: self.mem_size.unwrap_or(0),
            stack: self.stack.unwrap_or_default(),
            return_data: self.return_data,
            depth: self.depth.unwrap_or(0),
            refund: self.refund.unwrap_or(0),
            error: self.error,
        }
    }
}

/// Comparison-wide trace settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Number of top stack items kept; 0 keeps the full stack
    pub stack_window: usize,
    /// Drop `gasCost` (besu reports 0x7fffffffffffffff on out-of-gas)
    pub clear_gas_cost: bool,
    /// Drop `memSize` (nethermind reports memory expansion one step early)
    pub clear_memory_size: bool,
    /// Drop `refund` (not reported by nethermind)
    pub clear_refund: bool,
    /// Drop `returnData` (not reported by nethermind)
    pub clear_return_data: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            stack_window: 6,
            clear_gas_cost: true,
            clear_memory_size: true,
            clear_refund: true,
            clear_return_data: true,
        }
    }
}

impl TraceConfig {
    /// The compared part of a stack
    pub fn window<'a>(&self, stack: &'a [U256]) -> &'a [U256] {
        if self.stack_window == 0 || stack.len() <= self.stack_window {
            stack
        } else {
            &stack[stack.len() - self.stack_window..]
        }
    }

    /// Apply the suppression switches in place
    pub fn strip(&self, record: &mut TraceRecord) {
        if self.clear_gas_cost {
            record.gas_cost = 0;
        }
        if self.clear_memory_size {
            record.memory_size = 0;
        }
        if self.clear_refund {
            record.refund = 0;
        }
        if self.clear_return_data {
            record.return_data = None;
        }
        let keep = self.window(&record.stack).len();
        if keep < record.stack.len() {
            record.stack.drain(..record.stack.len() - keep);
        }
    }

    /// Append the canonical json line (including newline) for a record.
    pub fn write_record(&self, record: &TraceRecord, out: &mut Vec<u8>) {
        // Writes into a Vec never fail
        let _ = write!(
            out,
            r#"{{"depth":{},"pc":{},"gas":{},"op":"{:#04x}","opName":"#,
            record.depth, record.pc, record.gas, record.op
        );
        let _ = serde_json::to_writer(&mut *out, record.op_name().as_ref());
        if !self.clear_gas_cost {
            let _ = write!(out, r#","gasCost":{}"#, record.gas_cost);
        }
        if !self.clear_memory_size {
            let _ = write!(out, r#","memSize":{}"#, record.memory_size);
        }
        if !self.clear_refund {
            let _ = write!(out, r#","refund":{}"#, record.refund);
        }
        if !self.clear_return_data {
            let data = record.return_data.as_deref().unwrap_or_default();
            let _ = write!(out, r#","returnData":"0x{}""#, hex::encode(data));
        }
        out.extend_from_slice(br#","stack":["#);
        for (i, item) in self.window(&record.stack).iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            let _ = write!(out, "\"{}\"", format_u256(item));
        }
        out.push(b']');
        if let Some(err) = record.error.as_ref().filter(|e| !e.is_empty()) {
            out.extend_from_slice(br#","error":"#);
            let _ = serde_json::to_writer(&mut *out, err);
        }
        out.extend_from_slice(b"}\n");
    }

    /// Canonical line for a record
    pub fn record_line(&self, record: &TraceRecord) -> Vec<u8> {
        let mut out = Vec::with_capacity(200);
        self.write_record(record, &mut out);
        out
    }
}

/// Canonical line (with newline) for the terminal record. An unknown root is written
/// as an empty string so every stream ends with exactly one terminal line.
pub fn terminal_line(terminal: &TerminalRecord) -> Vec<u8> {
    let mut out = br#"{"stateRoot":"#.to_vec();
    let _ = serde_json::to_writer(&mut out, terminal.state_root.as_deref().unwrap_or(""));
    out.extend_from_slice(b"}\n");
    out
}

/// 0x-prefixed minimal hex, as geth prints stack items
pub fn format_u256(value: &U256) -> String {
    if value.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", value)
    }
}

// =============================================================================
// Lenient field parsing
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl Number {
    fn into_u64(self) -> Result<u64, String> {
        match self {
            Number::Unsigned(v) => Ok(v),
            // Besu and nethermind sometimes report a negative refund
            Number::Signed(v) => Ok(v.max(0) as u64),
            Number::Float(v) if v >= 0.0 => Ok(v as u64),
            Number::Float(_) => Ok(0),
            Number::Text(s) => parse_u64_text(&s),
        }
    }

    fn into_u256(self) -> Result<U256, String> {
        match self {
            Number::Unsigned(v) => Ok(U256::from(v)),
            Number::Text(s) => parse_u256_text(&s),
            Number::Signed(v) => Err(format!("negative stack item {}", v)),
            Number::Float(v) => Err(format!("non-integer stack item {}", v)),
        }
    }
}

fn parse_u64_text(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return Ok(0);
        }
        return u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex {:?}: {}", s, e));
    }
    if s.starts_with('-') {
        return Ok(0);
    }
    s.parse::<u64>().map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_u256_text(s: &str) -> Result<U256, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return Ok(U256::zero());
        }
        return U256::from_str_radix(hex, 16).map_err(|e| format!("invalid hex {:?}: {:?}", s, e));
    }
    U256::from_dec_str(s).map_err(|e| format!("invalid number {:?}: {:?}", s, e))
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Number> = Option::deserialize(deserializer)?;
    value
        .map(Number::into_u64)
        .transpose()
        .map_err(de::Error::custom)
}

fn lenient_u8<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_u64(deserializer)?
        .map(|v| u8::try_from(v).map_err(|_| de::Error::custom(format!("opcode {} out of range", v))))
        .transpose()
}

fn lenient_stack<'de, D>(deserializer: D) -> Result<Option<Vec<U256>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Vec<Number>> = Option::deserialize(deserializer)?;
    value
        .map(|items| items.into_iter().map(Number::into_u256).collect())
        .transpose()
        .map_err(de::Error::custom)
}

fn lenient_bytes<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    let Some(s) = value else {
        return Ok(None);
    };
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let padded = if s.len() % 2 == 1 {
        Cow::Owned(format!("0{}", s))
    } else {
        Cow::Borrowed(s)
    };
    hex::decode(padded.as_ref())
        .map(Some)
        .map_err(de::Error::custom)
}

fn lenient_error<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> TraceLine {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_parse_geth_line() {
        let line = parse(
            r#"{"pc":2,"op":96,"gas":"0x79bc18","gasCost":"0x3","memSize":0,"stack":["0x1","0xff"],"depth":1,"refund":0,"opName":"PUSH1"}"#,
        );
        let rec = line.into_record();
        assert_eq!(rec.pc, 2);
        assert_eq!(rec.op, 0x60);
        assert_eq!(rec.gas, 0x79bc18);
        assert_eq!(rec.gas_cost, 3);
        assert_eq!(rec.stack, vec![U256::from(1), U256::from(0xff)]);
        assert_eq!(rec.depth, 1);
        assert!(rec.error.is_none());
    }

    #[test]
    fn test_parse_nethermind_quirks() {
        let line = parse(
            r#"{"pc":0,"op":96,"gas":"0x5f5e100","gasCost":"0x3","memSize":"0x20","stack":[],"depth":1,"refund":-4800,"error":null}"#,
        );
        let rec = line.into_record();
        assert_eq!(rec.memory_size, 0x20);
        assert_eq!(rec.refund, 0);
        assert!(rec.error.is_none());
    }

    #[test]
    fn test_opcode_range() {
        assert_eq!(parse(r#"{"pc":0,"op":255,"depth":1}"#).into_record().op, 0xff);
        assert_eq!(parse(r#"{"pc":0,"op":"0xff","depth":1}"#).into_record().op, 0xff);
        for line in [r#"{"pc":0,"op":256,"depth":1}"#, r#"{"pc":0,"op":"0x100","depth":1}"#] {
            assert!(serde_json::from_str::<TraceLine>(line).is_err(), "{}", line);
        }
    }

    #[test]
    fn test_state_root_keys() {
        let geth = parse(r#"{"stateRoot": "0xabc"}"#);
        assert_eq!(geth.state_root(), Some("0xabc"));
        assert_eq!(geth.depth(), 0);

        let besu = parse(r#"{"output":"","gasUsed":"0x5208","postHash":"0xdef"}"#);
        assert_eq!(besu.state_root(), Some("0xdef"));

        let empty = parse(r#"{"stateRoot":""}"#);
        assert_eq!(empty.state_root(), None);
    }

    #[test]
    fn test_canonical_line_truncates_stack() {
        let rec = TraceRecord {
            pc: 7,
            op: 0x01,
            gas: 100,
            stack: (0..10u64).map(U256::from).collect(),
            depth: 1,
            ..Default::default()
        };
        let line = String::from_utf8(TraceConfig::default().record_line(&rec)).unwrap();
        assert_eq!(
            line,
            "{\"depth\":1,\"pc\":7,\"gas\":100,\"op\":\"0x01\",\"opName\":\"ADD\",\
             \"stack\":[\"0x4\",\"0x5\",\"0x6\",\"0x7\",\"0x8\",\"0x9\"]}\n"
        );
    }

    #[test]
    fn test_canonical_line_with_optional_fields() {
        let config = TraceConfig {
            stack_window: 0,
            clear_gas_cost: false,
            clear_memory_size: false,
            clear_refund: false,
            clear_return_data: false,
        };
        let rec = TraceRecord {
            pc: 1,
            op: 0xf3,
            gas: 10,
            gas_cost: 2,
            memory_size: 64,
            return_data: Some(vec![0xde, 0xad]),
            depth: 2,
            refund: 5,
            error: Some("out of \"gas\"".to_string()),
            ..Default::default()
        };
        let line = config.record_line(&rec);
        let parsed: TraceLine = serde_json::from_slice(&line).unwrap();
        assert_eq!(parsed.into_record(), rec);
    }

    #[test]
    fn test_terminal_line() {
        let line = terminal_line(&TerminalRecord::with_root("0x01"));
        assert_eq!(line, b"{\"stateRoot\":\"0x01\"}\n".to_vec());
        let line = terminal_line(&TerminalRecord::default());
        assert_eq!(line, b"{\"stateRoot\":\"\"}\n".to_vec());
    }

    #[test]
    fn test_merge_keeps_first_error() {
        let mut first = TraceRecord {
            pc: 3,
            depth: 1,
            ..Default::default()
        };
        let second = TraceRecord {
            pc: 3,
            depth: 1,
            error: Some("out of gas".to_string()),
            ..Default::default()
        };
        assert!(first.same_position(&second));
        first.merge(second);
        assert_eq!(first.error.as_deref(), Some("out of gas"));
    }

    #[test]
    fn test_strip_applies_window_and_switches() {
        let mut rec = TraceRecord {
            gas_cost: 9,
            memory_size: 32,
            refund: 1,
            return_data: Some(vec![1]),
            stack: (0..8u64).map(U256::from).collect(),
            depth: 1,
            ..Default::default()
        };
        TraceConfig::default().strip(&mut rec);
        assert_eq!(rec.gas_cost, 0);
        assert_eq!(rec.memory_size, 0);
        assert_eq!(rec.refund, 0);
        assert!(rec.return_data.is_none());
        assert_eq!(rec.stack.first(), Some(&U256::from(2)));
        assert_eq!(rec.stack.len(), 6);
    }
}
