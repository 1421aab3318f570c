//! Error types for memory operations.

/// Errors returned by the durable store, flusher and helpers.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// SQLite failure; the durable tier is treated as unavailable.
    #[error("storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),
    /// Durable tier unavailable for a reason other than SQLite.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored history snapshot could not be decoded.
    #[error("malformed history snapshot (thread_id={thread_id}): {reason}")]
    MalformedHistory { thread_id: String, reason: String },
    /// Blocking store task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}
