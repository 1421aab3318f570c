//! Test helpers shared across MemBot crates.

pub mod agent;
pub mod embed;
pub mod store;

pub use agent::{FailingAgent, FixedAgent, RecordingAgent};
pub use embed::StubEmbedder;
pub use store::FailingStore;
