//! Chat event types

use serde::{Deserialize, Serialize};

/// Events emitted as the conversation changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A user message was staged and the model call started
    TurnStarted { user: String },

    /// A streamed fragment was appended to the assistant message
    AssistantUpdate { delta: String, content: String },

    /// The turn completed and both messages were committed
    TurnCommitted {
        user_id: String,
        assistant_id: String,
        total_tokens: Option<u32>,
    },

    /// The turn was cancelled or superseded; nothing was committed
    TurnAborted,

    /// The model call failed; nothing was committed
    TurnFailed { message: String },

    /// Vendor, model or API key missing; the model was not called
    NotConfigured,

    /// Cumulative usage has reached the cap
    UsageCapExceeded { used: u64, cap: u64 },

    /// Older entries are being summarized
    SummaryStarted { entries: usize },

    /// Older entries were replaced by a summary
    SummaryApplied { entries: usize },

    /// Summary request failed; entries left as they were
    SummaryFailed { message: String },

    /// Curated entries were edited, hidden, shown or deleted
    ContextChanged,

    /// Everything was cleared
    Reset,
}

impl ChatEvent {
    /// Check if this event ends a turn
    pub fn ends_turn(&self) -> bool {
        matches!(
            self,
            ChatEvent::TurnCommitted { .. }
                | ChatEvent::TurnAborted
                | ChatEvent::TurnFailed { .. }
                | ChatEvent::NotConfigured
        )
    }
}
