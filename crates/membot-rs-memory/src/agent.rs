//! Chat agent abstraction used by conversational turns.

use crate::model::ConversationHistory;
use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by a chat agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent could not produce a reply.
    #[error("agent failed: {0}")]
    Failed(String),
    /// The agent returned an empty reply.
    #[error("agent returned an empty reply")]
    EmptyReply,
}

#[async_trait]
/// Produces the assistant reply for a conversation.
pub trait ChatAgent: Send + Sync {
    /// Reply to the last user message of `history`.
    async fn reply(&self, history: &ConversationHistory) -> Result<String, AgentError>;
}
