//! Anthropic Claude API provider

use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{Message, Role, StopReason, Usage},
    vendor::Model,
};
use async_stream::stream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::{describe_sse_error, header_value};

/// Anthropic API client
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key)
    }

    pub fn with_client(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Stream a response from Claude
    pub async fn stream(&self, model: &Model, messages: &[Message]) -> Result<MessageEventStream> {
        let request = build_request(model, messages);
        let url = format!("{}/v1/messages", model.base_url);

        tracing::debug!("Anthropic API URL: {}", url);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-api-key", header_value(&self.api_key)?);
        headers.insert("accept", header_value("application/json")?);
        headers.insert("content-type", header_value("application/json")?);
        headers.insert("anthropic-version", header_value("2023-06-01")?);

        let request_builder = self.client.post(&url).headers(headers).json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

/// System-role entries (the prompt and any summary) go to the `system` field.
fn build_request(model: &Model, messages: &[Message]) -> AnthropicRequest {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .filter(|text| !text.trim().is_empty())
        .collect();

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let messages = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| AnthropicMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect();

    AnthropicRequest {
        model: model.id.clone(),
        messages,
        max_tokens: model.max_tokens,
        stream: true,
        system,
    }
}

/// Create the event stream from SSE events
fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut usage = Usage::default();
        let mut stop_reason = StopReason::Stop;
        let mut error_message: Option<String> = None;

        yield MessageEvent::Start;

        while let Some(event_result) = event_source.next().await {
            match event_result {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.event == "message_start" {
                        if let Ok(data) = serde_json::from_str::<MessageStartEvent>(&message.data) {
                            usage.input = data.message.usage.input_tokens;
                            usage.output = data.message.usage.output_tokens;
                        }
                    } else if message.event == "content_block_delta" {
                        if let Ok(data) = serde_json::from_str::<ContentBlockDeltaEvent>(&message.data) {
                            if data.delta.delta_type == "text_delta" {
                                let delta = data.delta.text.unwrap_or_default();
                                if !delta.is_empty() {
                                    yield MessageEvent::TextDelta { delta };
                                }
                            }
                        }
                    } else if message.event == "message_delta" {
                        if let Ok(data) = serde_json::from_str::<MessageDeltaEvent>(&message.data) {
                            if let Some(reason) = data.delta.stop_reason {
                                stop_reason = map_stop_reason(&reason);
                            }
                            // message_delta carries cumulative output tokens
                            usage.output = data.usage.output_tokens;
                            if data.usage.input_tokens > 0 {
                                usage.input = data.usage.input_tokens;
                            }
                        }
                    } else if message.event == "message_stop" {
                        break;
                    } else if message.event == "error" {
                        if let Ok(data) = serde_json::from_str::<ErrorEvent>(&message.data) {
                            error_message = Some(format!("{}: {}", data.error.error_type, data.error.message));
                        } else {
                            error_message = Some(message.data.clone());
                        }
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    error_message = Some(describe_sse_error(e).await);
                    break;
                }
            }
        }
        event_source.close();

        if let Some(error_msg) = error_message {
            yield MessageEvent::Error { message: error_msg };
        } else {
            usage.total = Some(usage.input + usage.output);
            yield MessageEvent::Done { stop_reason, usage };
        }
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::Length,
        _ => StopReason::Stop,
    }
}

// Request types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

// SSE payloads

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    delta: DeltaInfo,
}

#[derive(Debug, Deserialize)]
struct DeltaInfo {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendor::Vendor;

    #[test]
    fn test_system_entries_move_to_system_field() {
        let model = Vendor::Claude.model("claude-3-5-haiku-latest").unwrap();
        let request = build_request(
            &model,
            &[
                Message::system("You are a tutor."),
                Message::system("Earlier: greetings were exchanged."),
                Message::user("안녕"),
            ],
        );
        assert_eq!(
            request.system.as_deref(),
            Some("You are a tutor.\n\nEarlier: greetings were exchanged.")
        );
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn test_blank_system_prompt_is_omitted() {
        let model = Vendor::Claude.model("claude-sonnet-4-5").unwrap();
        let request = build_request(&model, &[Message::system("  "), Message::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["max_tokens"], 4096);
    }

    #[test]
    fn test_map_stop_reason() {
        assert_eq!(map_stop_reason("max_tokens"), StopReason::Length);
        assert_eq!(map_stop_reason("end_turn"), StopReason::Stop);
    }
}
