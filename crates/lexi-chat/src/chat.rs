//! Turn orchestration
//!
//! [`Chat`] drives one conversation: it stages the user's message, streams
//! the model's answer into a pending assistant message, commits the pair,
//! records usage and then checks whether older context should be summarized.
//!
//! Turns and summaries each run in their own [`TaskSlot`], so starting a new
//! one cancels the previous task of the same kind. Every state change made by
//! a task happens under the conversation lock after re-checking the task's
//! token; a cancelled task can therefore never commit, even when its
//! completion races the cancellation.

use futures::StreamExt;
use lexi_ai::{Credentials, Message, MessageEvent, TextGenerator, Usage};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    context::build_context,
    conversation::{ChatSnapshot, Conversation},
    error::Result,
    events::ChatEvent,
    settings::{Settings, SettingsStore},
    summarize::{self, SummaryDecision},
    task::TaskSlot,
    usage::{CapStatus, UsageTracker},
};

/// What happened to a submitted message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The turn is streaming in the background
    Started,
    /// The text was blank
    Ignored,
    /// Vendor, model or API key missing; the model was not called
    NotConfigured,
}

/// A conversation session.
///
/// Cloning is cheap and every clone drives the same conversation.
#[derive(Clone)]
pub struct Chat {
    inner: Arc<ChatInner>,
}

struct ChatInner {
    conversation: Mutex<Conversation>,
    generator: Arc<dyn TextGenerator>,
    settings: Arc<dyn SettingsStore>,
    usage: UsageTracker,
    turn: TaskSlot,
    summary: TaskSlot,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl Chat {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: Arc<dyn SettingsStore>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ChatInner {
                conversation: Mutex::new(Conversation::default()),
                generator,
                usage: UsageTracker::new(Arc::clone(&settings)),
                settings,
                turn: TaskSlot::new("turn"),
                summary: TaskSlot::new("summary"),
                event_tx,
            }),
        }
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.inner.usage
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.inner.settings
    }

    /// Copy of the current conversation state
    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.conversation.lock().snapshot()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.conversation.lock().is_loading
    }

    /// Submit user text and start streaming the answer.
    ///
    /// Any turn still in flight is cancelled first. Blank text is ignored.
    /// Errors only come from the settings store.
    pub async fn submit(&self, text: &str) -> Result<Submission> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Submission::Ignored);
        }

        let settings = self.inner.settings.load().await?;
        self.inner.apply_settings(&settings);

        let Some(credentials) = settings.credentials() else {
            let mut conversation = self.inner.conversation.lock();
            self.inner.turn.cancel();
            if conversation.take_pending().is_some() {
                self.inner.emit(ChatEvent::TurnAborted);
            }
            tracing::warn!("Vendor, model or API key not configured; message not sent");
            self.inner.emit(ChatEvent::NotConfigured);
            return Ok(Submission::NotConfigured);
        };

        if let CapStatus::Exceeded { used, cap } =
            CapStatus::new(settings.token_usage, settings.token_cap)
        {
            tracing::warn!("Token usage {} has reached the cap of {}", used, cap);
            self.inner.emit(ChatEvent::UsageCapExceeded { used, cap });
        }

        let mut conversation = self.inner.conversation.lock();
        if conversation.pending.is_some() {
            tracing::debug!("superseding in-flight turn");
            self.inner.emit(ChatEvent::TurnAborted);
        }
        conversation.stage(text);
        let user = Message::user(text);
        let messages = build_context(
            &settings.system_prompt,
            conversation.store.entries(),
            Some(&user),
        );

        tracing::debug!(
            vendor = %credentials.vendor,
            model = %credentials.model,
            messages = messages.len(),
            "starting turn"
        );
        self.inner.emit(ChatEvent::TurnStarted {
            user: text.to_string(),
        });

        let inner = Arc::clone(&self.inner);
        self.inner
            .turn
            .spawn(move |cancel| inner.run_turn(messages, credentials, cancel));
        Ok(Submission::Started)
    }

    /// Abort the turn in flight, discarding its staged messages.
    ///
    /// Returns false if no turn was in flight.
    pub fn abort(&self) -> bool {
        let mut conversation = self.inner.conversation.lock();
        self.inner.turn.cancel();
        let aborted = conversation.take_pending().is_some();
        if aborted {
            tracing::debug!("turn aborted");
            self.inner.emit(ChatEvent::TurnAborted);
        }
        aborted
    }

    /// Delete a curated entry
    pub fn delete(&self, id: &str) -> bool {
        self.inner
            .edit_entries(|conversation| conversation.store.delete(id))
    }

    /// Flip an entry's hidden flag, returning the new value
    pub fn toggle_hidden(&self, id: &str) -> Option<bool> {
        let mut hidden = None;
        self.inner.edit_entries(|conversation| {
            hidden = conversation.store.toggle_hidden(id);
            hidden.is_some()
        });
        hidden
    }

    /// Replace an entry's content
    pub fn edit(&self, id: &str, content: &str) -> bool {
        self.inner
            .edit_entries(|conversation| conversation.store.edit_content(id, content))
    }

    /// Clear the conversation and cancel everything in flight
    pub fn reset(&self) {
        let mut conversation = self.inner.conversation.lock();
        self.inner.turn.cancel();
        self.inner.summary.cancel();
        conversation.reset_all();
        tracing::debug!("conversation reset");
        self.inner.emit(ChatEvent::Reset);
    }

    /// Apply settings that affect conversation state (forgetful visibility)
    pub fn apply_settings(&self, settings: &Settings) {
        self.inner.apply_settings(settings);
    }

    /// Follow settings changes pushed by the store until the chat is dropped
    pub fn follow_settings(&self) -> JoinHandle<()> {
        let mut rx = self.inner.settings.subscribe();
        let weak: Weak<ChatInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(settings) => match weak.upgrade() {
                        Some(inner) => inner.apply_settings(&settings),
                        None => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Settings follower lagged by {} updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Test `credentials` with a one-shot prompt and persist them on success
    pub async fn connect(&self, credentials: &Credentials) -> Result<String> {
        let reply = lexi_ai::test_connection(self.inner.generator.as_ref(), credentials).await?;
        let credentials = credentials.clone();
        self.inner
            .settings
            .update(Box::new(move |s: &mut Settings| s.set_credentials(&credentials)))
            .await?;
        Ok(reply)
    }

    /// Wait until no turn or summary task is running
    pub async fn settle(&self) {
        loop {
            let turn = self.inner.turn.settle().await;
            let summary = self.inner.summary.settle().await;
            if !turn && !summary {
                break;
            }
        }
    }
}

impl ChatInner {
    fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    fn apply_settings(&self, settings: &Settings) {
        let mut conversation = self.conversation.lock();
        if conversation.apply_forgetful(settings.forgetful_mode) {
            tracing::debug!(forgetful = settings.forgetful_mode, "context visibility updated");
            self.emit(ChatEvent::ContextChanged);
        }
    }

    fn edit_entries(&self, edit: impl FnOnce(&mut Conversation) -> bool) -> bool {
        let mut conversation = self.conversation.lock();
        let changed = edit(&mut conversation);
        if changed {
            self.emit(ChatEvent::ContextChanged);
        }
        changed
    }

    async fn run_turn(
        self: Arc<Self>,
        messages: Vec<Message>,
        credentials: Credentials,
        cancel: CancellationToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        let mut events = match self
            .generator
            .stream(messages, &credentials, cancel.clone())
            .await
        {
            Ok(events) => events,
            Err(e) => {
                self.fail_turn(&cancel, e.to_string());
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                event = events.next() => event,
            };

            match next {
                Some(MessageEvent::Start) => {}
                Some(MessageEvent::TextDelta { delta }) => {
                    let mut conversation = self.conversation.lock();
                    if cancel.is_cancelled() {
                        return;
                    }
                    if let Some(content) = conversation.append_fragment(&delta) {
                        let content = content.to_string();
                        self.emit(ChatEvent::AssistantUpdate { delta, content });
                    }
                }
                Some(MessageEvent::Done { usage, .. }) => {
                    self.complete_turn(&cancel, usage).await;
                    return;
                }
                Some(MessageEvent::Error { message }) => {
                    self.fail_turn(&cancel, message);
                    return;
                }
                None => {
                    self.fail_turn(&cancel, "stream ended before completion".to_string());
                    return;
                }
            }
        }
    }

    async fn complete_turn(self: &Arc<Self>, cancel: &CancellationToken, usage: Usage) {
        let total_tokens = usage.total_tokens();

        let committed = {
            let mut conversation = self.conversation.lock();
            if cancel.is_cancelled() {
                tracing::debug!("turn completed after cancellation; result discarded");
                return;
            }
            let Some(pending) = conversation.take_pending() else {
                return;
            };
            match pending.assistant {
                Some(assistant) => {
                    let (user_id, assistant_id) =
                        conversation.commit(pending.user.content, assistant.content);
                    tracing::debug!(?total_tokens, "turn committed");
                    self.emit(ChatEvent::TurnCommitted {
                        user_id,
                        assistant_id,
                        total_tokens,
                    });
                    true
                }
                None => {
                    tracing::warn!("Model returned an empty response; turn dropped");
                    self.emit(ChatEvent::TurnFailed {
                        message: "model returned an empty response".to_string(),
                    });
                    false
                }
            }
        };

        if let Some(total) = total_tokens {
            self.record_usage(total).await;
        }

        if committed {
            self.after_commit().await;
        }
    }

    fn fail_turn(&self, cancel: &CancellationToken, message: String) {
        let mut conversation = self.conversation.lock();
        if cancel.is_cancelled() {
            return;
        }
        conversation.take_pending();
        tracing::warn!("Turn failed: {}", message);
        self.emit(ChatEvent::TurnFailed { message });
    }

    async fn record_usage(&self, tokens: u32) {
        if let Err(e) = self.usage.add(u64::from(tokens)).await {
            tracing::warn!("Failed to record token usage: {}", e);
        }
    }

    /// Post-commit hook: start a summary if the curated list outgrew the threshold
    async fn after_commit(self: &Arc<Self>) {
        let settings = match self.settings.load().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load settings after commit: {}", e);
                return;
            }
        };

        let conversation = self.conversation.lock();
        let entries = conversation.store.entries().len();
        match summarize::decide(&settings, entries) {
            SummaryDecision::Summarize(credentials) => {
                let history = conversation.store.history().to_vec();
                self.emit(ChatEvent::SummaryStarted { entries });
                let inner = Arc::clone(self);
                self.summary
                    .spawn(move |cancel| inner.run_summary(history, credentials, cancel));
            }
            decision => {
                tracing::debug!(?decision, entries, "no summary needed");
            }
        }
    }

    async fn run_summary(
        self: Arc<Self>,
        history: Vec<Message>,
        credentials: Credentials,
        cancel: CancellationToken,
    ) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("summary superseded");
                return;
            }
            result = summarize::summarize(
                self.generator.as_ref(),
                &history,
                &credentials,
                cancel.clone(),
            ) => result,
        };

        let generation = match result {
            Ok(generation) if !generation.text.trim().is_empty() => generation,
            Ok(_) => {
                self.fail_summary(&cancel, "model returned an empty summary".to_string());
                return;
            }
            Err(e) if e.is_aborted() => return,
            Err(e) => {
                self.fail_summary(&cancel, e.to_string());
                return;
            }
        };

        {
            let mut conversation = self.conversation.lock();
            if cancel.is_cancelled() {
                tracing::debug!("summary finished after cancellation; result discarded");
                return;
            }
            conversation.store.replace_older_with_summary(generation.text);
            let entries = conversation.store.entries().len();
            tracing::debug!(entries, "summary applied");
            self.emit(ChatEvent::SummaryApplied { entries });
        }

        if let Some(total) = generation.usage.total_tokens() {
            self.record_usage(total).await;
        }
    }

    fn fail_summary(&self, cancel: &CancellationToken, message: String) {
        if cancel.is_cancelled() {
            return;
        }
        tracing::warn!("Summary failed: {}", message);
        self.emit(ChatEvent::SummaryFailed { message });
    }
}
