//! Assembles the exact message lists sent to the model

use lexi_ai::Message;

use crate::store::{ChatEntry, KEEP_RECENT};

/// Instruction placed before the history when asking for a summary
pub const SUMMARIZE_INSTRUCTION: &str = "Summarize the following conversation";

/// Messages for a normal turn: system prompt, visible entries, then the staged user message.
pub fn build_context(
    system_prompt: &str,
    entries: &[ChatEntry],
    pending_user: Option<&Message>,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(entries.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(
        entries
            .iter()
            .filter(|entry| !entry.hidden)
            .map(ChatEntry::to_message),
    );
    if let Some(user) = pending_user {
        messages.push(user.clone());
    }
    messages
}

/// Messages for a summary request.
///
/// Built from full history, which is never pruned, minus the most recent
/// [`KEEP_RECENT`] messages that stay verbatim.
pub fn build_summarization_context(history: &[Message]) -> Vec<Message> {
    let older = &history[..history.len().saturating_sub(KEEP_RECENT)];
    let mut messages = Vec::with_capacity(older.len() + 1);
    messages.push(Message::system(SUMMARIZE_INSTRUCTION));
    messages.extend_from_slice(older);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageStore;
    use lexi_ai::Role;

    #[test]
    fn test_context_starts_with_system_prompt() {
        let messages = build_context("prompt", &[], None);
        assert_eq!(messages, vec![Message::system("prompt")]);
    }

    #[test]
    fn test_context_skips_hidden_entries() {
        let mut store = MessageStore::new();
        store.commit_turn("q0", "a0");
        store.commit_turn("q1", "a1");
        let hidden_id = store.entries()[1].id.clone();
        store.toggle_hidden(&hidden_id);

        let pending = Message::user("q2");
        let messages = build_context("prompt", store.entries(), Some(&pending));

        assert_eq!(
            messages,
            vec![
                Message::system("prompt"),
                Message::user("q0"),
                Message::user("q1"),
                Message::assistant("a1"),
                Message::user("q2"),
            ]
        );
        assert!(!messages.iter().any(|m| m.content == "a0"));
    }

    #[test]
    fn test_context_never_contains_hidden() {
        let mut store = MessageStore::new();
        for i in 0..5 {
            store.commit_turn(format!("q{i}"), format!("a{i}"));
        }
        store.set_all_hidden(true);
        let messages = build_context("p", store.entries(), None);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_context_uses_edited_content() {
        let mut store = MessageStore::new();
        store.commit_turn("original", "a");
        let id = store.entries()[0].id.clone();
        store.edit_content(&id, "edited");
        let messages = build_context("p", store.entries(), None);
        assert_eq!(messages[1].content, "edited");
    }

    #[test]
    fn test_summarization_context_drops_recent_six() {
        let mut store = MessageStore::new();
        for i in 0..7 {
            store.commit_turn(format!("q{i}"), format!("a{i}"));
        }
        let messages = build_summarization_context(store.history());

        assert_eq!(messages.len(), 1 + 14 - KEEP_RECENT);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, SUMMARIZE_INSTRUCTION);
        assert_eq!(messages[1], Message::user("q0"));
        assert_eq!(messages.last().unwrap(), &Message::assistant("a3"));
    }

    #[test]
    fn test_summarization_context_short_history() {
        let history = vec![Message::user("q"), Message::assistant("a")];
        assert_eq!(build_summarization_context(&history).len(), 1);
    }
}
