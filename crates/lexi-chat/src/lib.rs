//! lexi-chat: conversation state and turn orchestration
//!
//! This crate owns the chat history, decides which part of it is sent to the
//! model on each turn, summarizes long conversations, tracks token usage and
//! coordinates cancellation of in-flight model calls.

pub mod chat;
pub mod context;
pub mod conversation;
pub mod error;
pub mod events;
pub mod settings;
pub mod store;
pub mod summarize;
pub mod task;
pub mod usage;

pub use chat::{Chat, Submission};
pub use context::{build_context, build_summarization_context};
pub use conversation::{ChatSnapshot, Conversation, PendingTurn};
pub use error::{Error, Result};
pub use events::ChatEvent;
pub use settings::{MemorySettingsStore, Settings, SettingsStore};
pub use store::{ChatEntry, MessageStore};
pub use usage::{CapStatus, UsageTracker};
