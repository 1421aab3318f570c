//! Tiered conversational memory for MemBot.
//!
//! Recent exchanges live in a bounded per-namespace hot cache, a background
//! flusher batches them into a SQLite store, and lookups fall back from the
//! hot tier to the durable tier on a miss.

pub mod agent;
pub mod error;
pub mod flusher;
pub mod gateway;
pub mod hot_cache;
pub mod model;
pub mod rank;
pub mod session;
pub mod store;

/// Chat agent collaborator interface.
pub use agent::{AgentError, ChatAgent};
/// Memory error type.
pub use error::MemoryError;
/// Background flushing.
pub use flusher::{BatchFlusher, FlushMode, FlushReport, FlusherHandle};
/// Gateway facade and its reports.
pub use gateway::{
    GatewaySettings, MemoryGateway, NamespaceStats, RankedOutcome, ShutdownReport, Turn,
};
/// Hot cache tier.
pub use hot_cache::{CacheState, FlushSnapshot, HotCache, Scan};
/// Memory and history models.
pub use model::{
    ChatMessage, ConversationHistory, Exchange, MemoryEntry, MemoryHit, MemoryTier, Role,
    SearchOutcome, normalize_text,
};
/// Ranking collaborators.
pub use rank::{Embedder, EmbeddingRanker, KeywordRanker, Ranker, SubstringRanker};
/// Active session state.
pub use session::SessionState;
/// Durable store interface and SQLite implementation.
pub use store::{BatchOutcome, DurableStore, SqliteStore};
