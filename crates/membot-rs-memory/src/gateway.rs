//! Memory gateway: the facade agents use to record and recall exchanges.
//!
//! The gateway owns one hot cache and one batch flusher per namespace plus a
//! shared durable store handle. Storage failures are logged here and turned
//! into degraded outcomes; they never reach the caller as errors.

use crate::agent::{AgentError, ChatAgent};
use crate::error::MemoryError;
use crate::flusher::{BatchFlusher, FlushMode, FlushReport, FlusherHandle};
use crate::hot_cache::{CacheState, HotCache};
use crate::model::{
    ConversationHistory, Exchange, MemoryEntry, MemoryHit, MemoryTier, Role, SearchOutcome,
    normalize_text,
};
use crate::rank::Ranker;
use crate::session::SessionState;
use crate::store::{DurableStore, run_blocking};
use log::{debug, info, warn};
use membot_rs_config::MembotConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;

/// Runtime settings for a gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub capacity: usize,
    pub batch_threshold: usize,
    pub flush_interval: Duration,
    /// Namespace used by callers that do not pick one.
    pub default_namespace: String,
    /// Thread whose history is loaded at start and saved with each flush.
    pub thread_id: String,
    pub system_prompt: String,
}

impl From<&MembotConfig> for GatewaySettings {
    fn from(config: &MembotConfig) -> Self {
        Self {
            capacity: config.memory.capacity,
            batch_threshold: config.memory.batch_threshold,
            flush_interval: config.memory.flush_interval(),
            default_namespace: config.memory.namespace.clone(),
            thread_id: config.session.thread_id.clone(),
            system_prompt: config.session.system_prompt.clone(),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&MembotConfig::default())
    }
}

/// Multi-result lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedOutcome {
    /// Ranked entries, most relevant first.
    pub entries: Vec<MemoryEntry>,
    /// True when the durable tier could not be queried.
    pub degraded: bool,
}

/// Result of one conversational turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub reply: String,
    /// Entry recorded for the exchange.
    pub entry: MemoryEntry,
}

/// Point-in-time view of one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceStats {
    pub namespace: String,
    pub state: CacheState,
    pub resident: usize,
    pub pending: usize,
    pub capacity: usize,
    pub batch_threshold: usize,
    /// Stored entry count, `None` when the durable tier is unavailable.
    pub durable: Option<usize>,
    /// Whether the background flusher task is alive.
    pub flusher_running: bool,
}

/// Outcome of a graceful shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Final flushes that wrote a snapshot.
    pub flushed: Vec<FlushReport>,
    /// Namespaces whose final flush failed, with the error.
    pub failures: Vec<(String, MemoryError)>,
    pub history_saved: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.history_saved
    }
}

struct NamespaceMemory {
    cache: Arc<HotCache>,
    flusher: Arc<BatchFlusher>,
    handle: Mutex<Option<FlusherHandle>>,
}

/// Tiered memory facade shared by the agent loop.
pub struct MemoryGateway {
    settings: GatewaySettings,
    store: Arc<dyn DurableStore>,
    session: Arc<SessionState>,
    namespaces: RwLock<HashMap<String, Arc<NamespaceMemory>>>,
    /// Next entry sequence number.
    sequence: AtomicU64,
    /// False until `sequence` was raised past the stored maximum.
    sequence_seeded: AtomicBool,
    closed: AtomicBool,
}

impl MemoryGateway {
    /// Load the session history and sequence seed, then open the gateway.
    ///
    /// A missing, malformed or unreadable history starts from the seeded prompt.
    pub async fn start(settings: GatewaySettings, store: Arc<dyn DurableStore>) -> Self {
        let history = load_history_or_seed(&store, &settings.thread_id, &settings.system_prompt)
            .await;
        let (next_sequence, seeded) =
            match run_blocking(&store, |store| store.max_sequence()).await {
                Ok(max) => (max + 1, true),
                Err(err) => {
                    warn!(
                        "failed to read sequence seed; starting at 1 until the store recovers (error={})",
                        err
                    );
                    (1, false)
                }
            };
        info!(
            "memory gateway started (thread_id={}, history_len={}, next_sequence={})",
            settings.thread_id,
            history.len(),
            next_sequence
        );
        let session = Arc::new(SessionState::new(settings.thread_id.clone(), history));
        Self {
            settings,
            store,
            session,
            namespaces: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(next_sequence),
            sequence_seeded: AtomicBool::new(seeded),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn default_namespace(&self) -> &str {
        &self.settings.default_namespace
    }

    /// Record a user/assistant exchange as `User: ... | Bot: ...`.
    pub fn record(&self, namespace: &str, exchange: &Exchange) -> MemoryEntry {
        self.record_text(namespace, &exchange.to_string())
    }

    /// Append raw text to the namespace hot cache and queue it for flushing.
    pub fn record_text(&self, namespace: &str, text: &str) -> MemoryEntry {
        let memory = self.namespace_memory(namespace);
        let (entry, _) = memory.cache.append_with(|| {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            MemoryEntry::new(namespace, text, sequence)
        });
        debug!(
            "recorded memory (namespace={}, sequence={}, pending={})",
            namespace,
            entry.sequence,
            memory.cache.pending()
        );
        self.ensure_flusher(&memory);
        entry
    }

    /// Tiered lookup: unflushed entries oldest first, then the durable store.
    pub async fn search(&self, namespace: &str, query: &str) -> SearchOutcome {
        let needle = normalize_text(query);
        if needle.is_empty() {
            return SearchOutcome::NotFound;
        }
        self.ensure_sequence_seed().await;
        if let Some(hit) = self
            .existing_namespace(namespace)
            .and_then(|memory| memory.cache.first_match(|entry| entry.matches(&needle)))
        {
            return SearchOutcome::Found(hit);
        }

        let ns = namespace.to_string();
        match run_blocking(&self.store, move |store| store.search(&ns, &needle)).await {
            Ok(Some(entry)) => found(entry, MemoryTier::Durable),
            Ok(None) => SearchOutcome::NotFound,
            Err(err) => {
                warn!(
                    "durable search failed; serving hot tier only (namespace={}, error={})",
                    namespace, err
                );
                SearchOutcome::Degraded {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Gather candidates from every tier and order them with `ranker`.
    pub async fn search_ranked(
        &self,
        namespace: &str,
        query: &str,
        ranker: &dyn Ranker,
        limit: usize,
    ) -> RankedOutcome {
        self.ensure_sequence_seed().await;
        let mut candidates = self.hot_candidates(namespace);
        let ns = namespace.to_string();
        let degraded = match run_blocking(&self.store, move |store| store.list(&ns, None)).await {
            Ok(stored) => {
                candidates.extend(stored);
                false
            }
            Err(err) => {
                warn!(
                    "durable listing failed; ranking hot tier only (namespace={}, error={})",
                    namespace, err
                );
                true
            }
        };
        candidates.sort_by_key(|entry| entry.sequence);
        let mut seen = HashSet::new();
        candidates.retain(|entry| seen.insert(entry.text.clone()));

        let mut entries = ranker.rank(query, candidates);
        entries.truncate(limit);
        RankedOutcome { entries, degraded }
    }

    /// Earliest entry of a namespace across all tiers.
    ///
    /// Stored entries always predate unflushed ones, so the durable tier wins
    /// whenever it holds anything.
    pub async fn recall_first_exchange(&self, namespace: &str) -> SearchOutcome {
        self.ensure_sequence_seed().await;
        let hot = self
            .existing_namespace(namespace)
            .and_then(|memory| memory.cache.first_match(|_| true));

        let ns = namespace.to_string();
        match run_blocking(&self.store, move |store| store.list(&ns, Some(1))).await {
            Ok(mut rows) => match (rows.pop(), hot) {
                (Some(stored), _) => found(stored, MemoryTier::Durable),
                (None, Some(hit)) => SearchOutcome::Found(hit),
                (None, None) => SearchOutcome::NotFound,
            },
            Err(err) => {
                warn!(
                    "durable recall failed (namespace={}, error={})",
                    namespace, err
                );
                match hot {
                    Some(hit) => SearchOutcome::Found(hit),
                    None => SearchOutcome::Degraded {
                        reason: err.to_string(),
                    },
                }
            }
        }
    }

    /// Durable entries of a namespace, oldest first.
    pub async fn stored_entries(
        &self,
        namespace: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let ns = namespace.to_string();
        run_blocking(&self.store, move |store| store.list(&ns, limit)).await
    }

    /// Resident hot cache entries of a namespace, oldest first.
    pub fn hot_entries(&self, namespace: &str) -> Vec<MemoryEntry> {
        self.existing_namespace(namespace)
            .map(|memory| memory.cache.entries())
            .unwrap_or_default()
    }

    pub fn thread_id(&self) -> &str {
        self.session.thread_id()
    }

    /// Current session history.
    pub fn history(&self) -> ConversationHistory {
        self.session.snapshot()
    }

    pub fn push_message(&self, role: Role, content: impl Into<String>) {
        self.session.push(role, content);
    }

    pub fn replace_history(&self, history: ConversationHistory) {
        self.session.replace(history);
    }

    /// Latest stored history of a thread, or the seeded prompt.
    pub async fn get_history(&self, thread_id: &str) -> ConversationHistory {
        load_history_or_seed(&self.store, thread_id, &self.settings.system_prompt).await
    }

    /// Persist a thread's history, updating the session when it is the active thread.
    ///
    /// Returns `false` when the store rejected the write.
    pub async fn save_history(&self, thread_id: &str, history: ConversationHistory) -> bool {
        if thread_id == self.session.thread_id() {
            self.session.replace(history.clone());
        }
        let thread = thread_id.to_string();
        match run_blocking(&self.store, move |store| store.save_history(&thread, &history)).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "failed to save history (thread_id={}, error={})",
                    thread_id, err
                );
                false
            }
        }
    }

    /// Run one chat turn: ask the agent, then remember the exchange.
    ///
    /// On agent failure only the user message has been appended to the history.
    pub async fn converse(
        &self,
        namespace: &str,
        agent: &dyn ChatAgent,
        input: &str,
    ) -> Result<Turn, AgentError> {
        self.ensure_sequence_seed().await;
        self.session.push(Role::User, input);
        let history = self.session.snapshot();
        let reply = agent.reply(&history).await?;
        if reply.trim().is_empty() {
            return Err(AgentError::EmptyReply);
        }
        self.session.push(Role::Assistant, reply.clone());
        let entry = self.record(namespace, &Exchange::new(input, reply.clone()));
        Ok(Turn { reply, entry })
    }

    /// Flush a namespace now, regardless of the batch threshold.
    pub async fn flush_now(&self, namespace: &str) -> Result<FlushReport, MemoryError> {
        self.ensure_sequence_seed().await;
        match self.existing_namespace(namespace) {
            Some(memory) => memory.flusher.flush(FlushMode::Force).await,
            None => Ok(FlushReport::skipped(namespace)),
        }
    }

    /// Force-flush every active namespace.
    pub async fn flush_all(&self) -> Vec<(String, Result<FlushReport, MemoryError>)> {
        self.ensure_sequence_seed().await;
        let mut results = Vec::new();
        for (namespace, memory) in self.snapshot_namespaces() {
            let result = memory.flusher.flush(FlushMode::Force).await;
            results.push((namespace, result));
        }
        results
    }

    pub async fn stats(&self, namespace: &str) -> NamespaceStats {
        self.ensure_sequence_seed().await;
        let (state, resident, pending, flusher_running) = match self.existing_namespace(namespace)
        {
            Some(memory) => (
                memory.cache.state(),
                memory.cache.size(),
                memory.cache.pending(),
                memory
                    .handle
                    .lock()
                    .as_ref()
                    .is_some_and(|handle| !handle.is_finished()),
            ),
            None => (CacheState::Empty, 0, 0, false),
        };
        let ns = namespace.to_string();
        let durable = run_blocking(&self.store, move |store| store.count(&ns))
            .await
            .inspect_err(|err| {
                warn!(
                    "failed to count stored memories (namespace={}, error={})",
                    namespace, err
                )
            })
            .ok();
        NamespaceStats {
            namespace: namespace.to_string(),
            state,
            resident,
            pending,
            capacity: self.settings.capacity.max(1),
            batch_threshold: self.settings.batch_threshold.max(1),
            durable,
            flusher_running,
        }
    }

    /// Namespaces recorded into since start, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every flusher, flush what is pending and save the session history.
    ///
    /// Failures are logged and reported; unflushed entries of a failed
    /// namespace are lost when the process exits.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.closed.store(true, Ordering::SeqCst);
        let mut report = ShutdownReport::default();
        for (namespace, memory) in self.snapshot_namespaces() {
            let handle = memory.handle.lock().take();
            if let Some(handle) = handle {
                handle.stop().await;
            }
            match memory.flusher.flush(FlushMode::Force).await {
                Ok(flushed) if flushed.is_skipped() => {}
                Ok(flushed) => report.flushed.push(flushed),
                Err(err) => {
                    warn!(
                        "final flush failed; pending entries dropped (namespace={}, pending={}, error={})",
                        namespace,
                        memory.cache.pending(),
                        err
                    );
                    report.failures.push((namespace, err));
                }
            }
        }

        let history = self.session.snapshot();
        let thread = self.session.thread_id().to_string();
        report.history_saved =
            match run_blocking(&self.store, move |store| store.save_history(&thread, &history))
                .await
            {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        "failed to save history on shutdown (thread_id={}, error={})",
                        self.session.thread_id(),
                        err
                    );
                    false
                }
            };
        info!(
            "memory gateway shut down (flushed={}, failures={}, history_saved={})",
            report.flushed.len(),
            report.failures.len(),
            report.history_saved
        );
        report
    }

    fn existing_namespace(&self, namespace: &str) -> Option<Arc<NamespaceMemory>> {
        self.namespaces.read().get(namespace).cloned()
    }

    fn namespace_memory(&self, namespace: &str) -> Arc<NamespaceMemory> {
        if let Some(memory) = self.existing_namespace(namespace) {
            return memory;
        }
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| {
                debug!("creating namespace memory (namespace={})", namespace);
                let cache = Arc::new(HotCache::new(
                    namespace,
                    self.settings.capacity,
                    self.settings.batch_threshold,
                ));
                let flusher = Arc::new(BatchFlusher::new(
                    Arc::clone(&cache),
                    Arc::clone(&self.store),
                    Arc::clone(&self.session),
                ));
                Arc::new(NamespaceMemory {
                    cache,
                    flusher,
                    handle: Mutex::new(None),
                })
            })
            .clone()
    }

    fn snapshot_namespaces(&self) -> Vec<(String, Arc<NamespaceMemory>)> {
        let mut namespaces: Vec<(String, Arc<NamespaceMemory>)> = self
            .namespaces
            .read()
            .iter()
            .map(|(name, memory)| (name.clone(), Arc::clone(memory)))
            .collect();
        namespaces.sort_by(|a, b| a.0.cmp(&b.0));
        namespaces
    }

    /// Start the namespace flusher on the current runtime if it is not running.
    ///
    /// `closed` is read under the handle lock so a concurrent `shutdown`
    /// either sees the new handle or this call sees `closed`.
    fn ensure_flusher(&self, memory: &NamespaceMemory) {
        let mut handle = memory.handle.lock();
        if self.closed.load(Ordering::SeqCst) {
            warn!(
                "gateway is shut down; entry will not be flushed automatically (namespace={})",
                memory.cache.namespace()
            );
            return;
        }
        if handle.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }
        match Handle::try_current() {
            Ok(runtime) => {
                *handle = Some(
                    Arc::clone(&memory.flusher).spawn(&runtime, self.settings.flush_interval),
                );
            }
            Err(_) => warn!(
                "no tokio runtime; flusher not started (namespace={})",
                memory.cache.namespace()
            ),
        }
    }

    /// Raise the sequence past the stored maximum once the store answers.
    async fn ensure_sequence_seed(&self) {
        if self.sequence_seeded.load(Ordering::SeqCst) {
            return;
        }
        match run_blocking(&self.store, |store| store.max_sequence()).await {
            Ok(max) => {
                let previous = self.sequence.fetch_max(max + 1, Ordering::SeqCst);
                self.sequence_seeded.store(true, Ordering::SeqCst);
                info!(
                    "sequence reseeded from store (previous={}, next={})",
                    previous,
                    previous.max(max + 1)
                );
            }
            Err(err) => debug!("sequence seed still unavailable (error={})", err),
        }
    }

    fn hot_candidates(&self, namespace: &str) -> Vec<MemoryEntry> {
        match self.existing_namespace(namespace) {
            Some(memory) => {
                let mut entries = memory.cache.evicted_pending();
                entries.extend(memory.cache.entries());
                entries
            }
            None => Vec::new(),
        }
    }
}

fn found(entry: MemoryEntry, tier: MemoryTier) -> SearchOutcome {
    SearchOutcome::Found(MemoryHit { entry, tier })
}

async fn load_history_or_seed(
    store: &Arc<dyn DurableStore>,
    thread_id: &str,
    system_prompt: &str,
) -> ConversationHistory {
    let thread = thread_id.to_string();
    match run_blocking(store, move |store| store.load_latest_history(&thread)).await {
        Ok(Some(history)) if !history.is_empty() => {
            debug!(
                "loaded history (thread_id={}, messages={})",
                thread_id,
                history.len()
            );
            history
        }
        Ok(_) => {
            debug!("no stored history; seeding (thread_id={})", thread_id);
            ConversationHistory::seeded(system_prompt)
        }
        Err(err) => {
            warn!(
                "history unavailable; seeding (thread_id={}, error={})",
                thread_id, err
            );
            ConversationHistory::seeded(system_prompt)
        }
    }
}
