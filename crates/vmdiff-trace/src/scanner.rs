//! Line oriented json scanner over child process output
//!
//! Clients print traces as one json object per line, interleaved with comments and
//! the occasional garbage line. The scanner yields the decodable lines one at a time and
//! hands everything else to a [`DiagnosticSink`].

use crate::error::{TraceError, TraceResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest accepted line
pub const MAX_LINE_SIZE: usize = 32 * 1024 * 1024;

/// Initial capacity of a fresh line buffer
const INITIAL_BUFFER_SIZE: usize = 64 * 1024;

/// Idle buffers kept by the global pool
const MAX_IDLE_BUFFERS: usize = 64;

/// Pool of line buffers shared by all scanners
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl BufferPool {
    /// Create a pool holding at most `max_idle` unused buffers
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Process wide pool
    pub fn global() -> Arc<BufferPool> {
        static POOL: OnceLock<Arc<BufferPool>> = OnceLock::new();
        POOL.get_or_init(|| Arc::new(BufferPool::new(MAX_IDLE_BUFFERS)))
            .clone()
    }

    /// Take a buffer, reusing an idle one when available
    pub fn take(&self) -> Vec<u8> {
        self.idle
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_BUFFER_SIZE))
    }

    /// Return a buffer to the pool
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

/// Receiver of the lines a scanner could not turn into records
pub trait DiagnosticSink: Send + Sync {
    /// Report one diagnostic originating from `source`
    fn diagnostic(&self, source: &str, message: &str);
}

/// Sink that logs diagnostics as warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn diagnostic(&self, source: &str, message: &str) {
        tracing::warn!(client = source, "{}", message);
    }
}

/// Sink that keeps diagnostics in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected diagnostics, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl DiagnosticSink for MemorySink {
    fn diagnostic(&self, _source: &str, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// Undecodable lines awaiting a report
struct PendingErrors {
    title: String,
    lines: Vec<String>,
}

/// Streaming jsonl decoder with a pooled line buffer.
pub struct JsonlScanner<R> {
    reader: R,
    buf: Vec<u8>,
    max_line: usize,
    source: String,
    sink: Arc<dyn DiagnosticSink>,
    pool: Arc<BufferPool>,
    pending: Option<PendingErrors>,
}

impl<R> JsonlScanner<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Scanner over `reader`, logging diagnostics through tracing
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        Self::with_sink(reader, source, Arc::new(LogSink))
    }

    /// Scanner reporting diagnostics to `sink`
    pub fn with_sink(
        reader: R,
        source: impl Into<String>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let pool = BufferPool::global();
        Self {
            reader,
            buf: pool.take(),
            max_line: MAX_LINE_SIZE,
            source: source.into(),
            sink,
            pool,
            pending: None,
        }
    }

    /// Override the maximum line size
    pub fn max_line(mut self, max: usize) -> Self {
        self.max_line = max;
        self
    }

    /// Use a specific buffer pool
    pub fn pool(mut self, pool: Arc<BufferPool>) -> Self {
        let old = std::mem::replace(&mut self.buf, pool.take());
        self.pool.put(old);
        self.pool = pool;
        self
    }

    /// Access the underlying reader, e.g. to keep a batch process pipe alive
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Decode the next json line. `Ok(None)` means the stream is exhausted.
    pub async fn next<T: DeserializeOwned>(&mut self) -> TraceResult<Option<T>> {
        loop {
            let more = match self.read_line().await {
                Ok(more) => more,
                Err(e) => {
                    self.flush_pending();
                    return Err(e);
                }
            };
            if !more {
                self.flush_pending();
                return Ok(None);
            }
            let line = trim_line(&self.buf);
            if line.is_empty() {
                continue;
            }
            if line[0] == b'#' {
                self.sink
                    .diagnostic(&self.source, &String::from_utf8_lossy(line));
                continue;
            }
            match serde_json::from_slice::<T>(line) {
                Ok(value) => {
                    self.flush_pending();
                    return Ok(Some(value));
                }
                Err(err) => {
                    let raw = String::from_utf8_lossy(line).into_owned();
                    let source = &self.source;
                    let pending = self.pending.get_or_insert_with(|| PendingErrors {
                        title: format!("{} error: {}", source, err),
                        lines: Vec::new(),
                    });
                    pending.lines.push(raw);
                }
            }
        }
    }

    /// Return the buffer to the pool. Dropping the scanner does the same.
    pub fn release(self) {}

    /// Read one line into the buffer, without the line terminator. Returns false at
    /// end of stream with nothing read.
    async fn read_line(&mut self) -> TraceResult<bool> {
        self.buf.clear();
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(!self.buf.is_empty());
            }
            let (done, used) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            };
            let size = self.buf.len() + used;
            if size > self.max_line {
                self.reader.consume(used);
                return Err(TraceError::LineTooLong {
                    size,
                    max: self.max_line,
                });
            }
            self.buf.extend_from_slice(&available[..used]);
            self.reader.consume(used);
            if done {
                return Ok(true);
            }
        }
    }

    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            let mut report = pending.title;
            for line in pending.lines {
                report.push_str("\n  | ");
                report.push_str(&line);
            }
            self.sink.diagnostic(&self.source, &report);
        }
    }
}

impl<R> Drop for JsonlScanner<R> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        if buf.capacity() > 0 {
            self.pool.put(buf);
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let line = &line[..end];
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    &line[start..]
}
