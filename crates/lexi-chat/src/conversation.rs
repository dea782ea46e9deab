//! Conversation state: committed messages, the in-flight turn, and loading status.

use lexi_ai::{Message, Role};

use crate::store::{ChatEntry, MessageStore};

/// Where the in-flight turn is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// User message recorded, model not yet answering
    Staged,
    /// At least one fragment received
    Streaming,
}

/// The turn currently in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub user: Message,
    /// Created on the first streamed fragment
    pub assistant: Option<Message>,
    pub phase: TurnPhase,
}

impl PendingTurn {
    fn new(text: impl Into<String>) -> Self {
        Self {
            user: Message::user(text),
            assistant: None,
            phase: TurnPhase::Staged,
        }
    }
}

/// Conversation state owned by one chat session.
#[derive(Debug, Default)]
pub struct Conversation {
    /// Committed messages
    pub store: MessageStore,
    /// The turn in flight, if any
    pub pending: Option<PendingTurn>,
    /// True while a turn is in flight
    pub is_loading: bool,
    /// Last forgetful flag applied to entry visibility
    pub(crate) applied_forgetful: Option<bool>,
}

impl Conversation {
    /// Stage `text` as the user side of a new turn, replacing any previous one
    pub fn stage(&mut self, text: impl Into<String>) -> &PendingTurn {
        self.is_loading = true;
        self.pending.insert(PendingTurn::new(text))
    }

    /// Append a streamed fragment, returning the assistant text so far
    pub fn append_fragment(&mut self, delta: &str) -> Option<&str> {
        let pending = self.pending.as_mut()?;
        pending.phase = TurnPhase::Streaming;
        let assistant = pending
            .assistant
            .get_or_insert_with(|| Message::assistant(String::new()));
        assistant.content.push_str(delta);
        Some(assistant.content.as_str())
    }

    /// Take the pending turn, leaving the conversation idle
    pub fn take_pending(&mut self) -> Option<PendingTurn> {
        self.is_loading = false;
        self.pending.take()
    }

    /// Commit a finished turn. In forgetful mode the new entries start hidden.
    pub fn commit(&mut self, user: String, assistant: String) -> (String, String) {
        let (user_id, assistant_id) = self.store.commit_turn(user, assistant);
        if self.applied_forgetful == Some(true) {
            self.store.toggle_hidden(&user_id);
            self.store.toggle_hidden(&assistant_id);
        }
        (user_id, assistant_id)
    }

    /// Clear everything, committed and pending
    pub fn reset_all(&mut self) {
        self.store.reset();
        self.pending = None;
        self.is_loading = false;
    }

    /// Hide or reveal every entry when the forgetful flag changes.
    ///
    /// Returns true if visibility was rewritten.
    pub fn apply_forgetful(&mut self, forgetful: bool) -> bool {
        if self.applied_forgetful == Some(forgetful) {
            return false;
        }
        self.applied_forgetful = Some(forgetful);
        self.store.set_all_hidden(forgetful);
        true
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            history: self.store.history().to_vec(),
            entries: self.store.entries().to_vec(),
            pending_user: self.pending.as_ref().map(|p| p.user.clone()),
            pending_assistant: self.pending.as_ref().and_then(|p| p.assistant.clone()),
            is_loading: self.is_loading,
        }
    }
}

/// A copy of the conversation for presentation
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub history: Vec<Message>,
    pub entries: Vec<ChatEntry>,
    pub pending_user: Option<Message>,
    pub pending_assistant: Option<Message>,
    pub is_loading: bool,
}

impl ChatSnapshot {
    /// Full history followed by the in-flight turn
    pub fn display_list(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.extend(self.pending_user.iter().cloned());
        messages.extend(self.pending_assistant.iter().cloned());
        messages
    }

    /// The system prompt (with an empty id) followed by every curated entry, hidden ones included
    pub fn context_list(&self, system_prompt: &str) -> Vec<ChatEntry> {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.push(ChatEntry {
            id: String::new(),
            role: Role::System,
            content: system_prompt.to_string(),
            hidden: false,
            created_at: chrono::Utc::now(),
        });
        entries.extend(self.entries.iter().cloned());
        entries
    }
}
