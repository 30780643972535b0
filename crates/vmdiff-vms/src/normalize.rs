//! Conversion of raw client output into canonical trace lines

use crate::client::ClientKind;
use crate::error::VmResult;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use vmdiff_trace::{terminal_line, JsonlScanner, TerminalRecord, TraceConfig, TraceLine, TraceRecord};

/// Flush threshold for the canonical output buffer
const FLUSH_SIZE: usize = 64 * 1024;

/// Outcome of draining one test's output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Copied {
    /// Root reported by the client
    pub state_root: Option<String>,
    /// Canonical steps written
    pub steps: u64,
}

/// Stateful filter applying the normalization rules to one test's records
#[derive(Debug)]
pub struct Normalizer {
    coalesce: bool,
    config: TraceConfig,
    pending: Option<TraceRecord>,
    state_root: Option<String>,
    steps: u64,
}

impl Normalizer {
    /// Normalizer for the quirks of `kind`
    pub fn new(kind: ClientKind, config: TraceConfig) -> Self {
        Self {
            coalesce: kind.coalesces_duplicates(),
            config,
            pending: None,
            state_root: None,
            steps: 0,
        }
    }

    /// Root captured so far
    pub fn state_root(&self) -> Option<&str> {
        self.state_root.as_deref()
    }

    /// Feed one parsed line, appending canonical output to `out`. Returns true if
    /// the line carried the state root.
    pub fn push(&mut self, line: TraceLine, out: &mut Vec<u8>) -> bool {
        if line.depth() == 0 {
            // Not an opcode: summary, root or a line whose fields did not parse
            if let Some(root) = line.state_root() {
                if self.state_root.is_none() {
                    self.state_root = Some(root.to_string());
                }
                return true;
            }
            return false;
        }
        let record = line.into_record();
        if record.is_stop() {
            return false;
        }
        if !self.coalesce {
            self.emit(&record, out);
            return false;
        }
        match self.pending.take() {
            Some(mut prev) if prev.same_position(&record) => {
                prev.merge(record);
                self.pending = Some(prev);
            }
            Some(prev) => {
                self.emit(&prev, out);
                self.pending = Some(record);
            }
            None => self.pending = Some(record),
        }
        false
    }

    /// Flush the buffered record and append the terminal line
    pub fn finish(mut self, out: &mut Vec<u8>) -> Copied {
        if let Some(prev) = self.pending.take() {
            self.emit(&prev, out);
        }
        let terminal = TerminalRecord {
            state_root: self.state_root.clone(),
        };
        out.extend_from_slice(&terminal_line(&terminal));
        Copied {
            state_root: self.state_root,
            steps: self.steps,
        }
    }

    fn emit(&mut self, record: &TraceRecord, out: &mut Vec<u8>) {
        self.config.write_record(record, out);
        self.steps += 1;
    }
}

/// Drain `scanner` to the end of the stream, writing canonical lines to `sink`.
pub async fn copy_trace<R, W>(
    scanner: &mut JsonlScanner<R>,
    sink: &mut W,
    normalizer: Normalizer,
) -> VmResult<Copied>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let copied = drain(scanner, sink, normalizer, false).await?;
    Ok(copied.unwrap_or_default())
}

/// Drain `scanner` up to and including the line carrying the state root. Returns
/// `None` if the stream ended first.
pub async fn copy_until_end<R, W>(
    scanner: &mut JsonlScanner<R>,
    sink: &mut W,
    normalizer: Normalizer,
) -> VmResult<Option<Copied>>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    drain(scanner, sink, normalizer, true).await
}

async fn drain<R, W>(
    scanner: &mut JsonlScanner<R>,
    sink: &mut W,
    mut normalizer: Normalizer,
    stop_at_root: bool,
) -> VmResult<Option<Copied>>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut out = Vec::with_capacity(FLUSH_SIZE);
    let mut reached_root = false;
    while let Some(line) = scanner.next::<TraceLine>().await? {
        if normalizer.push(line, &mut out) && stop_at_root {
            reached_root = true;
            break;
        }
        if out.len() >= FLUSH_SIZE {
            sink.write_all(&out).await?;
            out.clear();
        }
    }
    if stop_at_root && !reached_root {
        sink.write_all(&out).await?;
        sink.flush().await?;
        return Ok(None);
    }
    let copied = normalizer.finish(&mut out);
    sink.write_all(&out).await?;
    sink.flush().await?;
    Ok(Some(copied))
}
