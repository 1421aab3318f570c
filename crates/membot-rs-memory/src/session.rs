//! Conversation history of the active session.

use crate::model::{ConversationHistory, Role};
use parking_lot::RwLock;

/// Active thread and its in-memory history, shared with the flushers.
#[derive(Debug)]
pub struct SessionState {
    thread_id: String,
    history: RwLock<ConversationHistory>,
}

impl SessionState {
    pub fn new(thread_id: impl Into<String>, history: ConversationHistory) -> Self {
        Self {
            thread_id: thread_id.into(),
            history: RwLock::new(history),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Copy of the current history.
    pub fn snapshot(&self) -> ConversationHistory {
        self.history.read().clone()
    }

    pub fn push(&self, role: Role, content: impl Into<String>) {
        self.history.write().push(role, content);
    }

    pub fn replace(&self, history: ConversationHistory) {
        *self.history.write() = history;
    }
}
