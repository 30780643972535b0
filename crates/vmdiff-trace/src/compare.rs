//! Online comparison of trace streams and state roots

use crate::error::{CompareError, TraceResult};
use crate::record::{terminal_line, TerminalRecord, TraceConfig, TraceLine, TraceRecord};
use crate::scanner::{DiagnosticSink, JsonlScanner};
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;

/// One item of a normalized trace stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// An opcode step
    Step(TraceRecord),
    /// End of the trace
    End(TerminalRecord),
}

/// Anything the comparator can pull trace items from
#[async_trait]
pub trait StepSource: Send {
    /// Next item; `None` ends the stream like a terminal record without root.
    async fn next_item(&mut self) -> TraceResult<Option<StreamItem>>;
}

#[async_trait]
impl<S: StepSource + ?Sized> StepSource for Box<S> {
    async fn next_item(&mut self) -> TraceResult<Option<StreamItem>> {
        (**self).next_item().await
    }
}

#[async_trait]
impl StepSource for mpsc::Receiver<StreamItem> {
    async fn next_item(&mut self) -> TraceResult<Option<StreamItem>> {
        Ok(self.recv().await)
    }
}

#[async_trait]
impl StepSource for std::vec::IntoIter<StreamItem> {
    async fn next_item(&mut self) -> TraceResult<Option<StreamItem>> {
        Ok(self.next())
    }
}

/// Reads a trace file or pipe written in the canonical (or any client) dialect
pub struct TraceReader<R> {
    scanner: JsonlScanner<R>,
    finished: bool,
}

impl<R> TraceReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Reader over `reader`, labelled `source` in diagnostics
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        Self {
            scanner: JsonlScanner::new(reader, source),
            finished: false,
        }
    }

    /// Reader reporting diagnostics to `sink`
    pub fn with_sink(reader: R, source: impl Into<String>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            scanner: JsonlScanner::with_sink(reader, source, sink),
            finished: false,
        }
    }
}

#[async_trait]
impl<R> StepSource for TraceReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_item(&mut self) -> TraceResult<Option<StreamItem>> {
        if self.finished {
            return Ok(None);
        }
        while let Some(line) = self.scanner.next::<TraceLine>().await? {
            if line.depth() == 0 {
                if let Some(root) = line.state_root() {
                    self.finished = true;
                    return Ok(Some(StreamItem::End(TerminalRecord::with_root(root))));
                }
                continue;
            }
            let record = line.into_record();
            if record.is_stop() {
                continue;
            }
            return Ok(Some(StreamItem::Step(record)));
        }
        self.finished = true;
        Ok(None)
    }
}

/// Summary of an agreeing comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agreement {
    /// Number of compared steps
    pub steps: u64,
    /// Deepest call depth seen
    pub max_depth: u64,
    /// Agreed state root
    pub state_root: Option<String>,
}

/// First difference between the reference stream and another one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Zero based index of the differing step
    pub step: u64,
    /// Reference client name
    pub reference: String,
    /// Disagreeing client name
    pub other: String,
    /// Position of the disagreeing client
    pub other_index: usize,
    /// Names of the differing fields
    pub fields: Vec<&'static str>,
    /// Reference item, rendered canonically
    pub reference_line: String,
    /// Disagreeing item, rendered canonically
    pub other_line: String,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "step {}: {} and {} differ in [{}]",
            self.step,
            self.reference,
            self.other,
            self.fields.join(", ")
        )?;
        writeln!(f, "  {}: {}", self.reference, self.reference_line)?;
        write!(f, "  {}: {}", self.other, self.other_line)
    }
}

/// Result of comparing trace streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonOutcome {
    /// All streams are equivalent
    Agree(Agreement),
    /// Streams differ
    Divergent(Divergence),
    /// A stream could not be read
    ClientError {
        /// Failing client
        client: String,
        /// Error description
        error: String,
    },
}

impl ComparisonOutcome {
    /// Whether the streams agreed
    pub fn is_agree(&self) -> bool {
        matches!(self, ComparisonOutcome::Agree(_))
    }
}

/// Result of comparing state roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootOutcome {
    /// All roots equal
    Agree(String),
    /// Some roots differ from the first
    Disagree {
        /// Root of the first client
        reference: String,
        /// Indices of clients with a different root
        mismatched: Vec<usize>,
    },
}

/// Compare final state roots; all must equal the first.
pub fn compare_roots<S: AsRef<str>>(roots: &[S]) -> Result<RootOutcome, CompareError> {
    if roots.len() < 2 {
        return Err(CompareError::TooFewClients(roots.len()));
    }
    let reference = roots[0].as_ref();
    let mismatched: Vec<usize> = roots
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, root)| root.as_ref() != reference)
        .map(|(i, _)| i)
        .collect();
    if mismatched.is_empty() {
        Ok(RootOutcome::Agree(reference.to_string()))
    } else {
        Ok(RootOutcome::Disagree {
            reference: reference.to_string(),
            mismatched,
        })
    }
}

/// Fields of `b` that differ from `a` under `config`.
///
/// Two records that both carry an error agree whatever else they say.
pub fn diff_fields(config: &TraceConfig, a: &TraceRecord, b: &TraceRecord) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if a.error.is_some() && b.error.is_some() {
        return fields;
    }
    if a.pc != b.pc {
        fields.push("pc");
    }
    if a.op != b.op {
        fields.push("op");
    }
    if a.depth != b.depth {
        fields.push("depth");
    }
    if a.gas != b.gas {
        fields.push("gas");
    }
    if config.window(&a.stack) != config.window(&b.stack) {
        fields.push("stack");
    }
    if !config.clear_gas_cost && a.gas_cost != b.gas_cost {
        fields.push("gasCost");
    }
    if !config.clear_memory_size && a.memory_size != b.memory_size {
        fields.push("memSize");
    }
    if !config.clear_refund && a.refund != b.refund {
        fields.push("refund");
    }
    if !config.clear_return_data
        && a.return_data.as_deref().unwrap_or_default() != b.return_data.as_deref().unwrap_or_default()
    {
        fields.push("returnData");
    }
    if a.error.is_some() != b.error.is_some() {
        fields.push("error");
    }
    fields
}

/// N-way online trace comparator. Stream 0 is the reference.
#[derive(Debug, Clone)]
pub struct Comparator {
    names: Vec<String>,
    config: TraceConfig,
}

impl Comparator {
    /// Create a comparator for the named clients
    pub fn new(names: Vec<String>, config: TraceConfig) -> Result<Self, CompareError> {
        if names.len() < 2 {
            return Err(CompareError::TooFewClients(names.len()));
        }
        Ok(Self { names, config })
    }

    /// Client names
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Pull every source in lockstep until they end or differ.
    pub async fn compare<S: StepSource>(
        &self,
        sources: &mut [S],
    ) -> Result<ComparisonOutcome, CompareError> {
        if sources.len() != self.names.len() {
            return Err(CompareError::Mismatched {
                names: self.names.len(),
                sources: sources.len(),
            });
        }
        let mut steps = 0u64;
        let mut max_depth = 0u64;
        loop {
            let pulled = join_all(sources.iter_mut().map(|s| s.next_item())).await;
            let mut items = Vec::with_capacity(pulled.len());
            for (i, item) in pulled.into_iter().enumerate() {
                match item {
                    Ok(item) => {
                        items.push(item.unwrap_or_else(|| StreamItem::End(TerminalRecord::default())))
                    }
                    Err(e) => {
                        return Ok(ComparisonOutcome::ClientError {
                            client: self.names[i].clone(),
                            error: e.to_string(),
                        })
                    }
                }
            }

            let reference = &items[0];
            for (i, item) in items.iter().enumerate().skip(1) {
                let fields = match (reference, item) {
                    (StreamItem::Step(a), StreamItem::Step(b)) => diff_fields(&self.config, a, b),
                    (StreamItem::End(a), StreamItem::End(b)) if a.state_root != b.state_root => {
                        vec!["stateRoot"]
                    }
                    (StreamItem::End(_), StreamItem::End(_)) => Vec::new(),
                    _ => vec!["length"],
                };
                if !fields.is_empty() {
                    return Ok(ComparisonOutcome::Divergent(Divergence {
                        step: steps,
                        reference: self.names[0].clone(),
                        other: self.names[i].clone(),
                        other_index: i,
                        fields,
                        reference_line: self.render(reference),
                        other_line: self.render(item),
                    }));
                }
            }

            match &items[0] {
                StreamItem::End(terminal) => {
                    return Ok(ComparisonOutcome::Agree(Agreement {
                        steps,
                        max_depth,
                        state_root: terminal.state_root.clone(),
                    }))
                }
                StreamItem::Step(record) => {
                    max_depth = max_depth.max(record.depth);
                    steps += 1;
                }
            }
        }
    }

    fn render(&self, item: &StreamItem) -> String {
        let line = match item {
            StreamItem::Step(record) => self.config.record_line(record),
            StreamItem::End(terminal) => terminal_line(terminal),
        };
        String::from_utf8_lossy(&line).trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    fn step(pc: u64, gas: u64) -> StreamItem {
        StreamItem::Step(TraceRecord {
            pc,
            op: 0x60,
            gas,
            depth: 1,
            stack: vec![U256::from(pc)],
            ..Default::default()
        })
    }

    fn end(root: &str) -> StreamItem {
        StreamItem::End(TerminalRecord::with_root(root))
    }

    fn comparator(n: usize) -> Comparator {
        let names = (0..n).map(|i| format!("vm{}", i)).collect();
        Comparator::new(names, TraceConfig::default()).unwrap()
    }

    #[test]
    fn test_too_few_clients() {
        let err = Comparator::new(vec!["geth".into()], TraceConfig::default()).unwrap_err();
        assert_eq!(err, CompareError::TooFewClients(1));
        assert_eq!(compare_roots::<&str>(&[]).unwrap_err(), CompareError::TooFewClients(0));
    }

    #[tokio::test]
    async fn test_agree_counts_steps() {
        let trace = vec![step(0, 100), step(2, 97), end("0xaa")];
        let mut sources = vec![trace.clone().into_iter(), trace.clone().into_iter(), trace.into_iter()];
        let outcome = comparator(3).compare(&mut sources).await.unwrap();
        assert_eq!(
            outcome,
            ComparisonOutcome::Agree(Agreement {
                steps: 2,
                max_depth: 1,
                state_root: Some("0xaa".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_root_difference_is_divergence() {
        let mut sources = vec![
            vec![step(0, 100), end("0xaa")].into_iter(),
            vec![step(0, 100), end("0xbb")].into_iter(),
        ];
        match comparator(2).compare(&mut sources).await.unwrap() {
            ComparisonOutcome::Divergent(d) => {
                assert_eq!(d.step, 1);
                assert_eq!(d.fields, vec!["stateRoot"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mismatched_sources() {
        let mut sources = vec![Vec::new().into_iter()];
        let err = comparator(2).compare(&mut sources).await.unwrap_err();
        assert_eq!(err, CompareError::Mismatched { names: 2, sources: 1 });
    }

    #[test]
    fn test_compare_roots() {
        assert_eq!(
            compare_roots(&["0x1", "0x1", "0x1"]).unwrap(),
            RootOutcome::Agree("0x1".into())
        );
        assert_eq!(
            compare_roots(&["0x1", "0x2", "0x1", "0x3"]).unwrap(),
            RootOutcome::Disagree {
                reference: "0x1".into(),
                mismatched: vec![1, 3],
            }
        );
    }

    #[test]
    fn test_diff_fields_ignores_cleared() {
        let a = TraceRecord {
            gas_cost: 3,
            refund: 1,
            depth: 1,
            ..Default::default()
        };
        let b = TraceRecord {
            gas_cost: 0x7fffffffffffffff,
            depth: 1,
            ..Default::default()
        };
        assert!(diff_fields(&TraceConfig::default(), &a, &b).is_empty());

        let strict = TraceConfig {
            clear_gas_cost: false,
            clear_refund: false,
            ..TraceConfig::default()
        };
        assert_eq!(diff_fields(&strict, &a, &b), vec!["gasCost", "refund"]);
    }

    #[test]
    fn test_divergence_display() {
        let d = Divergence {
            step: 4,
            reference: "geth".into(),
            other: "besu".into(),
            other_index: 1,
            fields: vec!["gas", "stack"],
            reference_line: "a".into(),
            other_line: "b".into(),
        };
        assert_eq!(
            d.to_string(),
            "step 4: geth and besu differ in [gas, stack]\n  geth: a\n  besu: b"
        );
    }
}
