//! Vendor provider implementations

pub mod anthropic;
pub mod google;
pub mod openai;

use crate::{Api, Credentials, Message, MessageEventStream, Model, Result};
use async_trait::async_trait;

/// Trait for vendor providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Open a streaming completion for `messages`
    async fn stream(&self, model: &Model, messages: &[Message]) -> Result<MessageEventStream>;
}

#[async_trait]
impl LlmProvider for openai::OpenAIProvider {
    async fn stream(&self, model: &Model, messages: &[Message]) -> Result<MessageEventStream> {
        openai::OpenAIProvider::stream(self, model, messages).await
    }
}

#[async_trait]
impl LlmProvider for anthropic::AnthropicProvider {
    async fn stream(&self, model: &Model, messages: &[Message]) -> Result<MessageEventStream> {
        anthropic::AnthropicProvider::stream(self, model, messages).await
    }
}

#[async_trait]
impl LlmProvider for google::GoogleProvider {
    async fn stream(&self, model: &Model, messages: &[Message]) -> Result<MessageEventStream> {
        google::GoogleProvider::stream(self, model, messages).await
    }
}

/// Build the provider that speaks the API family of `credentials.vendor`
pub fn provider_for(client: &reqwest::Client, credentials: &Credentials) -> Box<dyn LlmProvider> {
    let key = credentials.api_key.clone();
    match credentials.vendor.api() {
        Api::OpenAICompletions => Box::new(openai::OpenAIProvider::with_client(client.clone(), key)),
        Api::AnthropicMessages => {
            Box::new(anthropic::AnthropicProvider::with_client(client.clone(), key))
        }
        Api::GoogleGenerativeAI => Box::new(google::GoogleProvider::with_client(client.clone(), key)),
    }
}

/// Render an SSE failure, including the response body for HTTP errors
pub(crate) async fn describe_sse_error(err: reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            format!("HTTP {}: {}", status.as_u16(), body.trim())
        }
        other => format!("SSE error: {}", other),
    }
}

/// Parse a header value, mapping failure to a config error
pub(crate) fn header_value(value: &str) -> Result<reqwest::header::HeaderValue> {
    value.parse().map_err(|_| crate::Error::InvalidApiKey)
}
