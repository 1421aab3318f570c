use async_trait::async_trait;
use membot_rs_memory::{AgentError, ChatAgent, ConversationHistory};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FixedAgent {
    reply: String,
}

impl FixedAgent {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ChatAgent for FixedAgent {
    async fn reply(&self, _history: &ConversationHistory) -> Result<String, AgentError> {
        Ok(self.reply.clone())
    }
}

/// Replies with a fixed text and keeps every history it was asked about.
#[derive(Debug, Clone)]
pub struct RecordingAgent {
    reply: String,
    seen: Arc<Mutex<Vec<ConversationHistory>>>,
}

impl RecordingAgent {
    pub fn new(reply: impl Into<String>) -> (Self, Arc<Mutex<Vec<ConversationHistory>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                reply: reply.into(),
                seen: seen.clone(),
            },
            seen,
        )
    }
}

#[async_trait]
impl ChatAgent for RecordingAgent {
    async fn reply(&self, history: &ConversationHistory) -> Result<String, AgentError> {
        self.seen.lock().push(history.clone());
        Ok(self.reply.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailingAgent;

#[async_trait]
impl ChatAgent for FailingAgent {
    async fn reply(&self, _history: &ConversationHistory) -> Result<String, AgentError> {
        Err(AgentError::Failed("agent offline".to_string()))
    }
}
