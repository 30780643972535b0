//! Sources of test files for a session

use crate::error::ProviderError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;
use vmdiff_statetest::{find_tests, store_test, test_file_name, StateTestFile};

/// Hands out test files. Called concurrently by every producer task; each call
/// persists the test it returns. `None` means the provider is exhausted.
#[async_trait]
pub trait TestProvider: Send + Sync {
    /// Next test for producer `thread_id`, which has already received `index` tests
    async fn next_test(&self, index: u64, thread_id: usize)
        -> Result<Option<PathBuf>, ProviderError>;
}

/// Provider backed by a closure
pub struct FnProvider<F> {
    f: F,
}

impl<F> FnProvider<F>
where
    F: Fn(u64, usize) -> Result<Option<PathBuf>, ProviderError> + Send + Sync,
{
    /// Wrap `f`
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> TestProvider for FnProvider<F>
where
    F: Fn(u64, usize) -> Result<Option<PathBuf>, ProviderError> + Send + Sync,
{
    async fn next_test(
        &self,
        index: u64,
        thread_id: usize,
    ) -> Result<Option<PathBuf>, ProviderError> {
        (self.f)(index, thread_id)
    }
}

/// Replays the `.json` files found under a directory, each exactly once
pub struct DirectoryProvider {
    pending: Mutex<std::vec::IntoIter<PathBuf>>,
    total: usize,
}

impl DirectoryProvider {
    /// Collect the tests under `dir` (or `dir` itself if it is a file)
    pub fn new(dir: &Path) -> Result<Self, ProviderError> {
        let tests = find_tests(dir)?;
        debug!(dir = %dir.display(), count = tests.len(), "Collected tests");
        Ok(Self {
            total: tests.len(),
            pending: Mutex::new(tests.into_iter()),
        })
    }

    /// Number of tests found
    pub fn total(&self) -> usize {
        self.total
    }
}

#[async_trait]
impl TestProvider for DirectoryProvider {
    async fn next_test(&self, _index: u64, _thread_id: usize) -> Result<Option<PathBuf>, ProviderError> {
        Ok(self.pending.lock().next())
    }
}

/// Produces state tests in memory
pub trait TestGenerator: Send + Sync {
    /// Build the next test
    fn generate(&self) -> Result<StateTestFile, ProviderError>;
}

impl<F> TestGenerator for F
where
    F: Fn() -> Result<StateTestFile, ProviderError> + Send + Sync,
{
    fn generate(&self) -> Result<StateTestFile, ProviderError> {
        self()
    }
}

/// Stores generated tests as `<location>/<index:08>-<name>-<thread>.json`
pub struct GeneratorProvider<G> {
    generator: G,
    name: String,
    location: PathBuf,
    limit: Option<u64>,
}

impl<G: TestGenerator> GeneratorProvider<G> {
    /// Provider writing tests produced by `generator` into `location`
    pub fn new(generator: G, name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            generator,
            name: name.into(),
            location: location.into(),
            limit: None,
        }
    }

    /// Stop each producer after `limit` tests
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
impl<G: TestGenerator> TestProvider for GeneratorProvider<G> {
    async fn next_test(
        &self,
        index: u64,
        thread_id: usize,
    ) -> Result<Option<PathBuf>, ProviderError> {
        if self.limit.is_some_and(|limit| index >= limit) {
            return Ok(None);
        }
        let test = self.generator.generate()?;
        let file_name = test_file_name(index, &self.name, thread_id);
        Ok(Some(store_test(&self.location, &file_name, &test)?))
    }
}
