//! Batch flusher integration tests.

use membot_rs_memory::{
    BatchFlusher, ConversationHistory, DurableStore, FlushMode, HotCache, MemoryEntry, Role,
    SessionState, SqliteStore,
};
use membot_rs_test_utils::FailingStore;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

fn session() -> Arc<SessionState> {
    let mut history = ConversationHistory::seeded("prompt");
    history.push(Role::User, "hi");
    Arc::new(SessionState::new("thread", history))
}

fn fill(cache: &HotCache, texts: &[&str]) {
    for (idx, text) in texts.iter().enumerate() {
        cache.append(MemoryEntry::new(cache.namespace(), *text, idx as u64 + 1));
    }
}

#[tokio::test]
async fn flush_honors_threshold_unless_forced() {
    let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
    let cache = Arc::new(HotCache::new("ns", 5, 3));
    let flusher = BatchFlusher::new(cache.clone(), store.clone(), session());
    fill(&cache, &["one", "two"]);

    let skipped = flusher.flush(FlushMode::IfReady).await.expect("flush");
    assert!(skipped.is_skipped());
    assert_eq!(cache.pending(), 2);

    let forced = flusher.flush(FlushMode::Force).await.expect("flush");
    assert_eq!(forced.attempted, 2);
    assert_eq!(forced.inserted, 2);
    assert!(cache.is_empty());
    assert_eq!(store.count("ns").expect("count"), 2);

    let saved = store
        .load_latest_history("thread")
        .expect("load")
        .expect("history");
    assert_eq!(saved.len(), 2);
}

#[tokio::test]
async fn reflushing_the_same_entries_adds_no_rows() {
    let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
    let cache = Arc::new(HotCache::new("ns", 5, 1));
    let flusher = BatchFlusher::new(cache.clone(), store.clone(), session());
    let entry = MemoryEntry::new("ns", "User: hi | Bot: hello", 1);

    cache.append(entry.clone());
    flusher.flush(FlushMode::Force).await.expect("first flush");
    cache.append(entry);
    let second = flusher.flush(FlushMode::Force).await.expect("second flush");

    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(store.count("ns").expect("count"), 1);
}

#[tokio::test]
async fn failed_flush_keeps_the_batch() {
    let store = FailingStore::new();
    let cache = Arc::new(HotCache::new("ns", 2, 1));
    let flusher = BatchFlusher::new(cache.clone(), store.clone(), session());
    fill(&cache, &["a", "b", "c"]);
    store.set_failing(true);

    assert!(flusher.flush(FlushMode::Force).await.is_err());
    assert_eq!(cache.pending(), 3);
    assert_eq!(cache.size(), 2);

    store.set_failing(false);
    let report = flusher.flush(FlushMode::Force).await.expect("retry");
    assert_eq!(report.inserted, 3);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn stopped_flusher_no_longer_flushes() {
    let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
    let cache = Arc::new(HotCache::new("ns", 5, 1));
    let flusher = Arc::new(BatchFlusher::new(cache.clone(), store.clone(), session()));

    let handle = flusher.spawn(&Handle::current(), Duration::from_millis(10));
    fill(&cache, &["first"]);
    for _ in 0..200 {
        if cache.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.count("ns").expect("count"), 1);

    handle.stop().await;
    cache.append(MemoryEntry::new("ns", "second", 2));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.pending(), 1);
    assert_eq!(store.count("ns").expect("count"), 1);
}

#[tokio::test]
async fn dropping_the_handle_ends_the_task() {
    let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
    let cache = Arc::new(HotCache::new("ns", 5, 1));
    let flusher = Arc::new(BatchFlusher::new(cache.clone(), store, session()));

    let handle = flusher.clone().spawn(&Handle::current(), Duration::from_millis(10));
    drop(handle);
    for _ in 0..200 {
        if Arc::strong_count(&flusher) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(Arc::strong_count(&flusher), 1);
}
