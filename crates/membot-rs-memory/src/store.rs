//! Durable memory tier backed by SQLite.

use crate::error::MemoryError;
use crate::model::{ConversationHistory, MemoryEntry, normalize_text};
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    namespace TEXT NOT NULL,
    text TEXT NOT NULL,
    original TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    UNIQUE (namespace, text)
);
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    messages TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS history_thread_idx ON history (thread_id, id);
";

const ENTRY_COLUMNS: &str = "id, namespace, text, original, sequence, recorded_at";

/// Counts from a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows written.
    pub inserted: usize,
    /// Entries skipped because their text already existed.
    pub duplicates: usize,
}

/// Persistent tier for memory entries and history snapshots.
pub trait DurableStore: Send + Sync {
    /// Insert an entry unless `(namespace, text)` already exists.
    ///
    /// Returns `false` for duplicates; duplicates are never an error.
    fn insert_if_absent(&self, entry: &MemoryEntry) -> Result<bool, MemoryError>;

    /// Insert-if-absent for a batch of entries.
    fn insert_batch(&self, entries: &[MemoryEntry]) -> Result<BatchOutcome, MemoryError> {
        let mut outcome = BatchOutcome::default();
        for entry in entries {
            if self.insert_if_absent(entry)? {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        Ok(outcome)
    }

    /// First entry (by insertion order) whose text contains the query.
    fn search(&self, namespace: &str, query: &str) -> Result<Option<MemoryEntry>, MemoryError>;

    /// Entries of a namespace in insertion order.
    fn list(&self, namespace: &str, limit: Option<usize>) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Number of stored entries in a namespace.
    fn count(&self, namespace: &str) -> Result<usize, MemoryError>;

    /// Highest sequence number persisted across all namespaces, 0 when empty.
    fn max_sequence(&self) -> Result<u64, MemoryError>;

    /// Replace the latest history snapshot for a thread.
    fn save_history(&self, thread_id: &str, history: &ConversationHistory)
    -> Result<(), MemoryError>;

    /// Latest history snapshot for a thread, if one was saved.
    fn load_latest_history(
        &self,
        thread_id: &str,
    ) -> Result<Option<ConversationHistory>, MemoryError>;
}

/// SQLite-backed durable store.
pub struct SqliteStore {
    /// Serialized access to the connection.
    conn: Mutex<Connection>,
    /// Database file, `None` for in-memory stores.
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        let store = Self::with_connection(conn, Some(path))?;
        info!(
            "initialized sqlite memory store (path={})",
            store.path.as_deref().unwrap_or(Path::new("")).display()
        );
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let store = Self::with_connection(Connection::open_in_memory()?, None)?;
        info!("initialized in-memory sqlite memory store");
        Ok(store)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, MemoryError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl DurableStore for SqliteStore {
    fn insert_if_absent(&self, entry: &MemoryEntry) -> Result<bool, MemoryError> {
        let conn = self.conn.lock();
        let inserted = insert_entry(&conn, entry)?;
        debug!(
            "insert memory (namespace={}, sequence={}, inserted={})",
            entry.namespace, entry.sequence, inserted
        );
        Ok(inserted)
    }

    /// Insert all entries inside one transaction.
    fn insert_batch(&self, entries: &[MemoryEntry]) -> Result<BatchOutcome, MemoryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();
        for entry in entries {
            if insert_entry(&tx, entry)? {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        tx.commit()?;
        debug!(
            "inserted memory batch (size={}, inserted={}, duplicates={})",
            entries.len(),
            outcome.inserted,
            outcome.duplicates
        );
        Ok(outcome)
    }

    fn search(&self, namespace: &str, query: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let pattern = format!("%{}%", escape_like(&normalize_text(query)));
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM memories \
                     WHERE namespace = ?1 AND text LIKE ?2 ESCAPE '\\' \
                     ORDER BY row_id ASC LIMIT 1"
                ),
                params![namespace, pattern],
                entry_from_row,
            )
            .optional()?;
        debug!(
            "durable search (namespace={}, found={})",
            namespace,
            entry.is_some()
        );
        Ok(entry)
    }

    fn list(&self, namespace: &str, limit: Option<usize>) -> Result<Vec<MemoryEntry>, MemoryError> {
        let limit = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let conn = self.conn.lock();
        let mut statement = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM memories WHERE namespace = ?1 \
             ORDER BY row_id ASC LIMIT ?2"
        ))?;
        let entries = statement
            .query_map(params![namespace, limit], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn count(&self, namespace: &str) -> Result<usize, MemoryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn max_sequence(&self) -> Result<u64, MemoryError> {
        let conn = self.conn.lock();
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM memories",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(max).unwrap_or_default())
    }

    /// Insert a new snapshot row and prune older rows of the same thread.
    fn save_history(
        &self,
        thread_id: &str,
        history: &ConversationHistory,
    ) -> Result<(), MemoryError> {
        let messages = serde_json::to_string(history)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO history (thread_id, messages, saved_at) VALUES (?1, ?2, ?3)",
            params![thread_id, messages, Utc::now()],
        )?;
        let latest = tx.last_insert_rowid();
        let pruned = tx.execute(
            "DELETE FROM history WHERE thread_id = ?1 AND id < ?2",
            params![thread_id, latest],
        )?;
        tx.commit()?;
        debug!(
            "saved history snapshot (thread_id={}, messages={}, pruned={})",
            thread_id,
            history.len(),
            pruned
        );
        Ok(())
    }

    fn load_latest_history(
        &self,
        thread_id: &str,
    ) -> Result<Option<ConversationHistory>, MemoryError> {
        let conn = self.conn.lock();
        let messages: Option<String> = conn
            .query_row(
                "SELECT messages FROM history WHERE thread_id = ?1 ORDER BY id DESC LIMIT 1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(messages) = messages else {
            return Ok(None);
        };
        let history = serde_json::from_str(&messages).map_err(|err| {
            MemoryError::MalformedHistory {
                thread_id: thread_id.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Some(history))
    }
}

/// Run a store call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(
    store: &Arc<dyn DurableStore>,
    call: F,
) -> Result<T, MemoryError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DurableStore) -> Result<T, MemoryError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|err| MemoryError::Task(err.to_string()))?
}

fn insert_entry(conn: &Connection, entry: &MemoryEntry) -> Result<bool, MemoryError> {
    let changed = conn.execute(
        &format!("INSERT OR IGNORE INTO memories ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            entry.id.to_string(),
            entry.namespace,
            entry.text,
            entry.original,
            i64::try_from(entry.sequence).unwrap_or(i64::MAX),
            entry.recorded_at,
        ],
    )?;
    Ok(changed == 1)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err)))?;
    let sequence: i64 = row.get(4)?;
    let recorded_at: DateTime<Utc> = row.get(5)?;
    Ok(MemoryEntry {
        id,
        namespace: row.get(1)?,
        text: row.get(2)?,
        original: row.get(3)?,
        sequence: u64::try_from(sequence).unwrap_or_default(),
        recorded_at,
    })
}

/// Escape LIKE wildcards so the query matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
