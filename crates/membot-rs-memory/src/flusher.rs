//! Periodic batch flushing of a namespace's hot cache into the durable store.

use crate::error::MemoryError;
use crate::hot_cache::HotCache;
use crate::session::SessionState;
use crate::store::{DurableStore, run_blocking};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Whether a flush honors the batch threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush only when the pending queue reached the threshold.
    IfReady,
    /// Flush whatever is pending.
    Force,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub namespace: String,
    /// Entries in the flushed snapshot; 0 when nothing ran.
    pub attempted: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

impl FlushReport {
    pub(crate) fn skipped(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            attempted: 0,
            inserted: 0,
            duplicates: 0,
        }
    }

    /// True when no snapshot was written.
    pub fn is_skipped(&self) -> bool {
        self.attempted == 0
    }
}

/// Writes hot cache batches and the session history to the durable store.
pub struct BatchFlusher {
    cache: Arc<HotCache>,
    store: Arc<dyn DurableStore>,
    session: Arc<SessionState>,
    /// Serializes background and explicit flushes of this namespace.
    flush_lock: tokio::sync::Mutex<()>,
}

impl BatchFlusher {
    pub fn new(
        cache: Arc<HotCache>,
        store: Arc<dyn DurableStore>,
        session: Arc<SessionState>,
    ) -> Self {
        Self {
            cache,
            store,
            session,
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn namespace(&self) -> &str {
        self.cache.namespace()
    }

    /// Snapshot pending entries, persist them with the history, then release them.
    ///
    /// On failure the snapshot stays queued and the error is returned.
    pub async fn flush(&self, mode: FlushMode) -> Result<FlushReport, MemoryError> {
        let _guard = self.flush_lock.lock().await;
        let namespace = self.namespace();
        if mode == FlushMode::IfReady && !self.cache.is_ready() {
            return Ok(FlushReport::skipped(namespace));
        }
        let Some(snapshot) = self.cache.begin_flush() else {
            return Ok(FlushReport::skipped(namespace));
        };

        let entries = snapshot.entries().to_vec();
        let history = self.session.snapshot();
        let thread_id = self.session.thread_id().to_string();
        debug!(
            "flushing hot cache (namespace={}, entries={}, mode={:?})",
            namespace,
            entries.len(),
            mode
        );
        let written = run_blocking(&self.store, move |store| {
            let outcome = store.insert_batch(&entries)?;
            store.save_history(&thread_id, &history)?;
            Ok(outcome)
        })
        .await;

        match written {
            Ok(outcome) => {
                let released = self.cache.complete_flush(&snapshot);
                info!(
                    "flushed hot cache (namespace={}, released={}, inserted={}, duplicates={})",
                    namespace, released, outcome.inserted, outcome.duplicates
                );
                Ok(FlushReport {
                    namespace: namespace.to_string(),
                    attempted: snapshot.len(),
                    inserted: outcome.inserted,
                    duplicates: outcome.duplicates,
                })
            }
            Err(err) => {
                self.cache.abort_flush();
                warn!(
                    "flush failed; batch retained for retry (namespace={}, entries={}, error={})",
                    namespace,
                    snapshot.len(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Start the periodic flush task on the given runtime.
    pub fn spawn(self: Arc<Self>, runtime: &Handle, interval: Duration) -> FlusherHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let namespace = self.namespace().to_string();
        let interval = interval.max(MIN_INTERVAL);
        debug!(
            "starting flusher (namespace={}, interval_ms={})",
            namespace,
            interval.as_millis()
        );
        let flusher = self;
        let join = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Failures are logged by `flush` and retried next tick.
                        let _ = flusher.flush(FlushMode::IfReady).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("flusher stopped (namespace={})", flusher.namespace());
        });
        FlusherHandle {
            namespace,
            shutdown,
            join: Some(join),
        }
    }
}

/// Cancellation handle for a running flusher task.
///
/// Dropping the handle signals the task to stop after its current flush.
pub struct FlusherHandle {
    namespace: String,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl FlusherHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Signal the task and wait until it exits. An in-flight flush completes.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take()
            && let Err(err) = join.await
        {
            warn!(
                "flusher task ended abnormally (namespace={}, error={})",
                self.namespace, err
            );
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for FlusherHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
