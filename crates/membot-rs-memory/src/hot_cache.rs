//! Bounded per-namespace hot cache with a pending-flush queue.
//!
//! The resident window holds at most `capacity` entries and evicts oldest
//! first. Every appended entry is also queued for flushing; eviction from the
//! window never removes an entry from that queue, so unflushed data is only
//! released by a completed flush. Resident entries are always a suffix of
//! the pending queue until they are flushed.

use crate::model::{MemoryEntry, MemoryHit, MemoryTier};
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Flush lifecycle state of a namespace cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing pending.
    Empty,
    /// Pending entries below the batch threshold.
    Filling,
    /// Pending entries at or above the batch threshold.
    ReadyToFlush,
    /// A flush snapshot is being written.
    Flushing,
}

#[derive(Debug, Default)]
struct CacheInner {
    resident: VecDeque<MemoryEntry>,
    pending: VecDeque<MemoryEntry>,
    flushing: bool,
}

/// Entries captured at flush start.
#[derive(Debug, Clone)]
pub struct FlushSnapshot {
    entries: Vec<MemoryEntry>,
}

impl FlushSnapshot {
    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Volatile bounded buffer for one namespace.
#[derive(Debug)]
pub struct HotCache {
    namespace: String,
    capacity: usize,
    batch_threshold: usize,
    inner: Mutex<CacheInner>,
}

impl HotCache {
    /// Create a cache; capacity and threshold are clamped to at least 1.
    pub fn new(namespace: impl Into<String>, capacity: usize, batch_threshold: usize) -> Self {
        Self {
            namespace: namespace.into(),
            capacity: capacity.max(1),
            batch_threshold: batch_threshold.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    /// Append to the tail, returning the evicted entry if the window overflowed.
    pub fn append(&self, entry: MemoryEntry) -> Option<MemoryEntry> {
        self.append_with(|| entry).1
    }

    /// Build and append an entry while holding the cache lock.
    ///
    /// Entries built by concurrent callers land in the order `make` ran, so a
    /// sequence drawn inside `make` stays monotonic along the queue.
    pub fn append_with<F>(&self, make: F) -> (MemoryEntry, Option<MemoryEntry>)
    where
        F: FnOnce() -> MemoryEntry,
    {
        let mut inner = self.inner.lock();
        let entry = make();
        debug_assert_eq!(entry.namespace, self.namespace);
        inner.pending.push_back(entry.clone());
        inner.resident.push_back(entry.clone());
        if inner.resident.len() <= self.capacity {
            return (entry, None);
        }
        let evicted = inner.resident.pop_front();
        if let Some(evicted) = &evicted {
            debug!(
                "evicted from hot cache (namespace={}, sequence={})",
                self.namespace, evicted.sequence
            );
        }
        (entry, evicted)
    }

    /// Number of resident entries.
    pub fn size(&self) -> usize {
        self.inner.lock().resident.len()
    }

    /// Number of entries waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.resident.is_empty() && inner.pending.is_empty()
    }

    /// True once the pending queue reached the batch threshold.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().pending.len() >= self.batch_threshold
    }

    pub fn state(&self) -> CacheState {
        let inner = self.inner.lock();
        if inner.flushing {
            CacheState::Flushing
        } else if inner.pending.is_empty() {
            CacheState::Empty
        } else if inner.pending.len() < self.batch_threshold {
            CacheState::Filling
        } else {
            CacheState::ReadyToFlush
        }
    }

    /// Drop every resident and pending entry, returning how many were pending.
    ///
    /// Unflushed entries are lost; flushing goes through `complete_flush`.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.pending.len();
        inner.resident.clear();
        inner.pending.clear();
        dropped
    }

    /// Resident entries, oldest first.
    pub fn entries(&self) -> Vec<MemoryEntry> {
        self.inner.lock().resident.iter().cloned().collect()
    }

    /// Lazy scan over a snapshot of resident entries, oldest first.
    pub fn scan<P>(&self, predicate: P) -> Scan<P>
    where
        P: Fn(&MemoryEntry) -> bool,
    {
        Scan {
            entries: self.entries().into(),
            position: 0,
            predicate,
        }
    }

    /// Entries queued for flushing that already left the resident window.
    pub fn evicted_pending(&self) -> Vec<MemoryEntry> {
        let inner = self.inner.lock();
        let resident: HashSet<Uuid> = inner.resident.iter().map(|entry| entry.id).collect();
        inner
            .pending
            .iter()
            .filter(|entry| !resident.contains(&entry.id))
            .cloned()
            .collect()
    }

    /// Oldest unflushed entry matching `predicate`.
    ///
    /// Tagged `Hot` while still resident and `Pending` once evicted.
    pub fn first_match<P>(&self, predicate: P) -> Option<MemoryHit>
    where
        P: Fn(&MemoryEntry) -> bool,
    {
        let inner = self.inner.lock();
        let entry = inner.pending.iter().find(|entry| predicate(entry))?;
        let tier = if inner.resident.iter().any(|resident| resident.id == entry.id) {
            MemoryTier::Hot
        } else {
            MemoryTier::Pending
        };
        Some(MemoryHit {
            entry: entry.clone(),
            tier,
        })
    }

    /// Oldest unflushed entry, if any.
    pub fn oldest_pending(&self) -> Option<MemoryEntry> {
        self.inner.lock().pending.front().cloned()
    }

    /// Capture the pending queue and mark the cache as flushing.
    ///
    /// Returns `None` when nothing is pending.
    pub fn begin_flush(&self) -> Option<FlushSnapshot> {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            return None;
        }
        inner.flushing = true;
        Some(FlushSnapshot {
            entries: inner.pending.iter().cloned().collect(),
        })
    }

    /// Remove exactly the snapshotted entries after a successful write.
    ///
    /// Entries appended since `begin_flush` stay queued for the next cycle.
    pub fn complete_flush(&self, snapshot: &FlushSnapshot) -> usize {
        let flushed: HashSet<Uuid> = snapshot.entries.iter().map(|entry| entry.id).collect();
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending.retain(|entry| !flushed.contains(&entry.id));
        inner.resident.retain(|entry| !flushed.contains(&entry.id));
        inner.flushing = false;
        before - inner.pending.len()
    }

    /// Leave the buffer intact after a failed write.
    pub fn abort_flush(&self) {
        self.inner.lock().flushing = false;
    }
}

/// Restartable iterator over a point-in-time copy of the resident window.
#[derive(Clone)]
pub struct Scan<P> {
    entries: Arc<[MemoryEntry]>,
    position: usize,
    predicate: P,
}

impl<P> Scan<P> {
    /// Rewind to the oldest entry of the same snapshot.
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl<P> Iterator for Scan<P>
where
    P: Fn(&MemoryEntry) -> bool,
{
    type Item = MemoryEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.entries.get(self.position) {
            self.position += 1;
            if (self.predicate)(entry) {
                return Some(entry.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheState, HotCache};
    use crate::model::{MemoryEntry, MemoryHit, MemoryTier};
    use pretty_assertions::assert_eq;

    fn entry(text: &str, sequence: u64) -> MemoryEntry {
        MemoryEntry::new("ns", text, sequence)
    }

    fn texts(cache: &HotCache) -> Vec<String> {
        cache.entries().into_iter().map(|e| e.original).collect()
    }

    #[test]
    fn evicts_oldest_once_over_capacity() {
        let cache = HotCache::new("ns", 3, 10);
        for (idx, text) in ["E1", "E2", "E3"].iter().enumerate() {
            assert_eq!(cache.append(entry(text, idx as u64)), None);
        }
        let evicted = cache.append(entry("E4", 3)).expect("evicted");
        assert_eq!(evicted.original, "E1");
        assert_eq!(texts(&cache), vec!["E2", "E3", "E4"]);
        assert_eq!(cache.pending(), 4);
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = HotCache::new("ns", 2, 100);
        for seq in 0..50 {
            cache.append(entry(&format!("entry {seq}"), seq));
            assert!(cache.size() <= 2);
        }
        let sequences: Vec<u64> = cache.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![48, 49]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = HotCache::new("ns", 0, 0);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.batch_threshold(), 1);
    }

    #[test]
    fn state_follows_threshold() {
        let cache = HotCache::new("ns", 5, 2);
        assert_eq!(cache.state(), CacheState::Empty);
        cache.append(entry("a", 1));
        assert_eq!(cache.state(), CacheState::Filling);
        cache.append(entry("b", 2));
        assert_eq!(cache.state(), CacheState::ReadyToFlush);
        let snapshot = cache.begin_flush().expect("snapshot");
        assert_eq!(cache.state(), CacheState::Flushing);
        cache.complete_flush(&snapshot);
        assert_eq!(cache.state(), CacheState::Empty);
    }

    #[test]
    fn appends_during_flush_survive_completion() {
        let cache = HotCache::new("ns", 5, 2);
        cache.append(entry("a", 1));
        cache.append(entry("b", 2));
        let snapshot = cache.begin_flush().expect("snapshot");
        cache.append(entry("c", 3));
        assert_eq!(cache.complete_flush(&snapshot), 2);
        assert_eq!(texts(&cache), vec!["c"]);
        assert_eq!(cache.pending(), 1);
    }

    #[test]
    fn aborted_flush_retains_everything() {
        let cache = HotCache::new("ns", 5, 1);
        cache.append(entry("a", 1));
        let snapshot = cache.begin_flush().expect("snapshot");
        assert_eq!(snapshot.len(), 1);
        cache.abort_flush();
        assert_eq!(cache.pending(), 1);
        assert_eq!(cache.state(), CacheState::ReadyToFlush);
    }

    #[test]
    fn begin_flush_on_empty_cache_is_none() {
        let cache = HotCache::new("ns", 5, 1);
        assert!(cache.begin_flush().is_none());
    }

    #[test]
    fn evicted_entries_stay_pending_until_flushed() {
        let cache = HotCache::new("ns", 1, 10);
        cache.append(entry("old", 1));
        cache.append(entry("new", 2));
        let evicted: Vec<String> = cache
            .evicted_pending()
            .into_iter()
            .map(|e| e.original)
            .collect();
        assert_eq!(evicted, vec!["old"]);
        assert_eq!(cache.oldest_pending().map(|e| e.original), Some("old".to_string()));
    }

    #[test]
    fn scan_is_ordered_lazy_and_restartable() {
        let cache = HotCache::new("ns", 5, 10);
        cache.append(entry("apple pie", 1));
        cache.append(entry("banana", 2));
        cache.append(entry("apple tart", 3));

        let mut scan = cache.scan(|e| e.matches("apple"));
        assert_eq!(scan.next().map(|e| e.original), Some("apple pie".to_string()));
        // Appends after the scan started are not visible to it.
        cache.append(entry("apple crumble", 4));
        assert_eq!(scan.next().map(|e| e.original), Some("apple tart".to_string()));
        assert_eq!(scan.next(), None);

        scan.restart();
        assert_eq!(scan.count(), 2);
    }

    #[test]
    fn first_match_prefers_older_evicted_entries() {
        let cache = HotCache::new("ns", 1, 10);
        cache.append(entry("apple one", 1));
        cache.append(entry("apple two", 2));

        let hit = cache.first_match(|e| e.matches("apple")).expect("hit");
        assert_eq!(hit.entry.original, "apple one");
        assert_eq!(hit.tier, MemoryTier::Pending);
        let hit = cache.first_match(|e| e.matches("two")).expect("hit");
        assert_eq!(hit.tier, MemoryTier::Hot);
        assert!(cache.first_match(|e| e.matches("pear")).is_none());
    }

    #[test]
    fn append_with_builds_entries_under_the_lock() {
        let cache = HotCache::new("ns", 2, 10);
        let (first, evicted) = cache.append_with(|| entry("a", 1));
        assert_eq!(first.sequence, 1);
        assert_eq!(evicted, None);
        cache.append_with(|| entry("b", 2));
        let (_, evicted) = cache.append_with(|| entry("c", 3));
        assert_eq!(evicted.map(|e| e.sequence), Some(1));
    }

    #[test]
    fn clear_reports_dropped_pending() {
        let cache = HotCache::new("ns", 2, 10);
        cache.append(entry("a", 1));
        cache.append(entry("b", 2));
        cache.append(entry("c", 3));
        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
    }
}
