//! Cross-run test counter

use crate::{MetricsError, MetricsResult};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Persistence hook for the global counter
pub trait CounterStore: Send + Sync {
    /// Load the persisted total; a missing value is 0
    fn load(&self) -> MetricsResult<u64>;
    /// Persist the total
    fn store(&self, total: u64) -> MetricsResult<()>;
}

/// Counter persisted as a decimal number in a file
#[derive(Debug, Clone)]
pub struct FileCounterStore {
    path: PathBuf,
}

impl FileCounterStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CounterStore for FileCounterStore {
    fn load(&self) -> MetricsResult<u64> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(0);
                }
                text.parse()
                    .map_err(|_| MetricsError::InvalidCounter(text.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, total: u64) -> MetricsResult<()> {
        std::fs::write(&self.path, total.to_string())?;
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    value: Mutex<u64>,
}

impl MemoryCounterStore {
    /// Store starting at `value`
    pub fn new(value: u64) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }
}

impl CounterStore for MemoryCounterStore {
    fn load(&self) -> MetricsResult<u64> {
        Ok(*self.value.lock())
    }

    fn store(&self, total: u64) -> MetricsResult<()> {
        *self.value.lock() = total;
        Ok(())
    }
}

/// Total last written through the store, and the session count it included
#[derive(Debug, Default)]
struct Flushed {
    total: u64,
    session: u64,
}

/// Number of tests executed across all runs. Every [`persist`](Self::persist)
/// re-reads the store and adds only the tests counted since the previous one, so
/// concurrent runs sharing a store merge their counts.
pub struct GlobalCounter {
    session: AtomicU64,
    flushed: Mutex<Flushed>,
    store: Box<dyn CounterStore>,
}

impl GlobalCounter {
    /// Load the previous total from `store`
    pub fn open(store: Box<dyn CounterStore>) -> MetricsResult<Self> {
        let total = store.load()?;
        Ok(Self {
            session: AtomicU64::new(0),
            flushed: Mutex::new(Flushed { total, session: 0 }),
            store,
        })
    }

    /// Counter that is not persisted anywhere
    pub fn in_memory() -> Self {
        Self {
            session: AtomicU64::new(0),
            flushed: Mutex::new(Flushed::default()),
            store: Box::new(MemoryCounterStore::default()),
        }
    }

    /// Count `n` more tests
    pub fn add(&self, n: u64) {
        self.session.fetch_add(n, Ordering::Relaxed);
    }

    /// Set the number of tests of this session
    pub fn set_session(&self, n: u64) {
        self.session.store(n, Ordering::Relaxed);
    }

    /// Total as of the last persist, plus the tests counted since
    pub fn total(&self) -> u64 {
        let flushed = self.flushed.lock();
        let session = self.session.load(Ordering::Relaxed);
        flushed.total + session.saturating_sub(flushed.session)
    }

    /// Add the tests counted since the last persist to the stored total
    pub fn persist(&self) -> MetricsResult<()> {
        let mut flushed = self.flushed.lock();
        let session = self.session.load(Ordering::Relaxed);
        let total = self.store.load()? + session.saturating_sub(flushed.session);
        self.store.store(total)?;
        *flushed = Flushed { total, session };
        Ok(())
    }
}
