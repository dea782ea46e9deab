//! Full history plus the curated entries used to build model context

use chrono::{DateTime, Utc};
use lexi_ai::{Message, Role};
use serde::{Deserialize, Serialize};

/// Summarize once there are more curated entries than this
pub const SUMMARY_THRESHOLD: usize = 12;

/// Entries kept verbatim when older ones are replaced by a summary
pub const KEEP_RECENT: usize = 6;

/// One curated entry: editable, hideable, deletable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Excluded from model input while set
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatEntry {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            hidden: false,
            created_at: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.content.clone())
    }
}

/// Committed messages in two forms.
///
/// `history` is the literal record of every committed turn and is never
/// edited. `entries` is the curated view the user edits, hides and prunes;
/// it is what normal turns are built from and what summaries shorten.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    history: Vec<Message>,
    entries: Vec<ChatEntry>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn entry(&self, id: &str) -> Option<&ChatEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut ChatEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Append a completed turn to both lists.
    ///
    /// Returns the identifiers given to the new user and assistant entries.
    pub fn commit_turn(
        &mut self,
        user: impl Into<String>,
        assistant: impl Into<String>,
    ) -> (String, String) {
        let user = ChatEntry::new(Role::User, user);
        let assistant = ChatEntry::new(Role::Assistant, assistant);
        let ids = (user.id.clone(), assistant.id.clone());

        self.history.push(user.to_message());
        self.history.push(assistant.to_message());
        self.entries.push(user);
        self.entries.push(assistant);
        ids
    }

    /// Remove a curated entry. History is untouched.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Flip the hidden flag, returning the new value
    pub fn toggle_hidden(&mut self, id: &str) -> Option<bool> {
        let entry = self.entry_mut(id)?;
        entry.hidden = !entry.hidden;
        Some(entry.hidden)
    }

    /// Replace a curated entry's content. History keeps the original text.
    pub fn edit_content(&mut self, id: &str, content: impl Into<String>) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn set_all_hidden(&mut self, hidden: bool) {
        for entry in &mut self.entries {
            entry.hidden = hidden;
        }
    }

    /// Keep the last [`KEEP_RECENT`] entries behind one system entry holding `summary`
    pub fn replace_older_with_summary(&mut self, summary: impl Into<String>) {
        let keep_from = self.entries.len().saturating_sub(KEEP_RECENT);
        let recent = self.entries.split_off(keep_from);

        let mut entries = Vec::with_capacity(recent.len() + 1);
        entries.push(ChatEntry::new(Role::System, summary));
        entries.extend(recent);
        self.entries = entries;
    }

    /// Whether the curated list has grown past the summary threshold
    pub fn needs_summary(&self) -> bool {
        self.entries.len() > SUMMARY_THRESHOLD
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.entries.clear();
    }
}
