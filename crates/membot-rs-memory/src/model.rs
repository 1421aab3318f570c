//! Memory entry, conversation history and lookup outcome models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Normalize memory text for dedup and matching.
///
/// Trims, collapses whitespace runs to a single space and lower-cases.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One remembered exchange within a namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Owning conversation/user partition.
    pub namespace: String,
    /// Normalized text, unique per namespace in the durable store.
    pub text: String,
    /// Text as recorded, returned by lookups.
    pub original: String,
    /// Monotonic creation order.
    pub sequence: u64,
    /// Wall-clock creation time.
    pub recorded_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// Build an entry from raw text, deriving the normalized form.
    pub fn new(namespace: impl Into<String>, original: impl Into<String>, sequence: u64) -> Self {
        let original = original.into();
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            text: normalize_text(&original),
            original,
            sequence,
            recorded_at: Utc::now(),
        }
    }

    /// True when the normalized text contains the normalized needle.
    pub fn matches(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }

    /// User half of a `User: ... | Bot: ...` entry, if it has that shape.
    pub fn user_part(&self) -> Option<&str> {
        let (user, _) = self.original.split_once(" | ")?;
        Some(user.strip_prefix("User:").unwrap_or(user).trim())
    }
}

/// A user query paired with the assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User: {} | Bot: {}", self.user.trim(), self.assistant.trim())
    }
}

/// Speaker role for a history message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt.
    System,
    /// User-authored message.
    User,
    /// Assistant-authored message.
    Assistant,
}

impl Role {
    /// Return the role as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Role-tagged message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered messages of one conversation thread.
///
/// Serializes as a bare JSON array of messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    /// History holding only the system prompt.
    pub fn seeded(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::new(Role::System, system_prompt)],
        }
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Tier a lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTier {
    /// Resident hot cache window.
    Hot,
    /// Evicted from the window but not yet flushed.
    Pending,
    /// SQLite store.
    Durable,
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub entry: MemoryEntry,
    pub tier: MemoryTier,
}

impl MemoryHit {
    /// Recorded (non-normalized) text of the matched entry.
    pub fn text(&self) -> &str {
        &self.entry.original
    }
}

/// Result of a tiered lookup. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(MemoryHit),
    NotFound,
    /// The hot tier missed and the durable tier could not be queried.
    Degraded { reason: String },
}

impl SearchOutcome {
    pub fn hit(&self) -> Option<&MemoryHit> {
        match self {
            SearchOutcome::Found(hit) => Some(hit),
            _ => None,
        }
    }

    /// Matched text, or `None` for not-found and degraded outcomes.
    pub fn text(&self) -> Option<&str> {
        self.hit().map(MemoryHit::text)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SearchOutcome::Degraded { .. })
    }
}
