//! Streaming event types and utilities

use crate::types::{StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted during message streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// The vendor accepted the request
    Start,
    /// Text content delta
    TextDelta { delta: String },
    /// Message completed successfully
    Done { stop_reason: StopReason, usage: Usage },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Accumulates streamed text and the final usage
#[derive(Debug, Default)]
pub struct MessageBuilder {
    text: String,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
    error: Option<String>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the message state
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::Start => {}
            MessageEvent::TextDelta { delta } => self.text.push_str(delta),
            MessageEvent::Done { stop_reason, usage } => {
                self.stop_reason = Some(*stop_reason);
                self.usage = Some(usage.clone());
            }
            MessageEvent::Error { message } => {
                self.stop_reason = Some(StopReason::Error);
                self.error = Some(message.clone());
            }
        }
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Consume the builder, yielding the full text and usage, or the stream error
    pub fn finish(self) -> crate::Result<(String, Usage)> {
        if let Some(message) = self.error {
            return Err(crate::Error::api("stream_error", message));
        }
        match self.usage {
            Some(usage) => Ok((self.text, usage)),
            None => Err(crate::Error::UnexpectedResponse(
                "stream ended before completion".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(total: u32) -> MessageEvent {
        MessageEvent::Done {
            stop_reason: StopReason::Stop,
            usage: Usage {
                total: Some(total),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_builder_concatenates_in_order() {
        let mut builder = MessageBuilder::new();
        for event in [
            MessageEvent::Start,
            MessageEvent::TextDelta { delta: "Hi".into() },
            MessageEvent::TextDelta {
                delta: " there".into(),
            },
            done(5),
        ] {
            builder.process_event(&event);
        }
        assert!(builder.is_finished());
        let (text, usage) = builder.finish().unwrap();
        assert_eq!(text, "Hi there");
        assert_eq!(usage.total_tokens(), Some(5));
    }

    #[test]
    fn test_builder_surfaces_error() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::TextDelta { delta: "x".into() });
        builder.process_event(&MessageEvent::Error {
            message: "boom".into(),
        });
        assert!(builder.finish().is_err());
    }

    #[test]
    fn test_builder_requires_done() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::TextDelta { delta: "x".into() });
        assert!(matches!(
            builder.finish(),
            Err(crate::Error::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_event_serde_tag() {
        let json = serde_json::to_string(&MessageEvent::TextDelta { delta: "a".into() }).unwrap();
        assert_eq!(json, r#"{"type":"text_delta","delta":"a"}"#);
        assert!(done(1).is_terminal());
        assert!(!MessageEvent::Start.is_terminal());
    }
}
