use membot_rs_memory::{
    BatchOutcome, ConversationHistory, DurableStore, MemoryEntry, MemoryError, SqliteStore,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory SQLite store that can be switched into an unavailable state.
pub struct FailingStore {
    inner: SqliteStore,
    failing: AtomicBool,
    rejected: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Self::wrap(SqliteStore::open_in_memory().expect("in-memory sqlite store"))
    }

    pub fn wrap(inner: SqliteStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing: AtomicBool::new(false),
            rejected: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls rejected while failing.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    fn check(&self) -> Result<(), MemoryError> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(MemoryError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

impl DurableStore for FailingStore {
    fn insert_if_absent(&self, entry: &MemoryEntry) -> Result<bool, MemoryError> {
        self.check()?;
        self.inner.insert_if_absent(entry)
    }

    fn insert_batch(&self, entries: &[MemoryEntry]) -> Result<BatchOutcome, MemoryError> {
        self.check()?;
        self.inner.insert_batch(entries)
    }

    fn search(&self, namespace: &str, query: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        self.check()?;
        self.inner.search(namespace, query)
    }

    fn list(&self, namespace: &str, limit: Option<usize>) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.check()?;
        self.inner.list(namespace, limit)
    }

    fn count(&self, namespace: &str) -> Result<usize, MemoryError> {
        self.check()?;
        self.inner.count(namespace)
    }

    fn max_sequence(&self) -> Result<u64, MemoryError> {
        self.check()?;
        self.inner.max_sequence()
    }

    fn save_history(
        &self,
        thread_id: &str,
        history: &ConversationHistory,
    ) -> Result<(), MemoryError> {
        self.check()?;
        self.inner.save_history(thread_id, history)
    }

    fn load_latest_history(
        &self,
        thread_id: &str,
    ) -> Result<Option<ConversationHistory>, MemoryError> {
        self.check()?;
        self.inner.load_latest_history(thread_id)
    }
}
