//! Configuration schema for MemBot.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// System prompt used to seed a thread that has no saved history.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are MemBot, a helpful assistant with persistent memory. \
Assist users conversationally, remember every exchange, and when asked about past \
interactions answer from the most relevant stored memory. If nothing relevant is found, \
say it may be in older records and rely on the conversation history.";

/// Root config for MemBot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MembotConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl MembotConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> MembotConfigBuilder {
        MembotConfigBuilder::new()
    }
}

/// Builder for assembling a `MembotConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct MembotConfigBuilder {
    config: MembotConfig,
}

impl MembotConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: MembotConfig::default(),
        }
    }

    /// Replace the memory configuration.
    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.config.memory = memory;
        self
    }

    /// Replace the session configuration.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Override the hot cache capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.memory.capacity = capacity;
        self
    }

    /// Override the flush batch threshold.
    pub fn batch_threshold(mut self, batch_threshold: usize) -> Self {
        self.config.memory.batch_threshold = batch_threshold;
        self
    }

    /// Override the memory namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.memory.namespace = namespace.into();
        self
    }

    /// Override the conversation thread id.
    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.config.session.thread_id = thread_id.into();
        self
    }

    /// Finalize and return the built `MembotConfig`.
    pub fn build(self) -> MembotConfig {
        self.config
    }
}

/// Hot cache, flush and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    /// Maximum entries resident in the hot cache per namespace.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Pending entries required before a background flush runs.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
    /// Seconds between background flush checks.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: f64,
    /// Default namespace used when the caller does not pick one.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// SQLite database path; in-memory when unset.
    #[serde(default)]
    pub path: Option<String>,
}

impl MemoryConfig {
    /// Flush interval as a `Duration`; unrepresentable values fall back to the default.
    pub fn flush_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.flush_interval_seconds)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_flush_interval_seconds()))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            batch_threshold: default_batch_threshold(),
            flush_interval_seconds: default_flush_interval_seconds(),
            namespace: default_namespace(),
            path: None,
        }
    }
}

fn default_capacity() -> usize {
    3
}

fn default_batch_threshold() -> usize {
    3
}

fn default_flush_interval_seconds() -> f64 {
    1.0
}

fn default_namespace() -> String {
    "user_1".to_string()
}

/// Conversation session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Thread whose history is loaded at start and saved on flush.
    #[serde(default = "default_thread_id")]
    pub thread_id: String,
    /// Prompt seeded into a thread with no saved history.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            thread_id: default_thread_id(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_thread_id() -> String {
    "user_1_thread".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
