//! The text-generation capability consumed by the conversation core

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    providers::{self, LlmProvider},
    stream::{MessageBuilder, MessageEvent, MessageEventStream},
    types::{Message, Usage},
    vendor::Credentials,
};

/// Prompt sent by [`test_connection`]
pub const CONNECTION_TEST_PROMPT: &str = "what is 1 + 1";

/// Result of a one-shot generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

/// Something that can turn an ordered message list into model output.
///
/// `stream` is used for conversation turns. `generate` is the one-shot form
/// used for summaries and connectivity checks; by default it drains `stream`.
/// Implementations should stop producing events once `cancel` fires.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Stream a response for `messages`
    async fn stream(
        &self,
        messages: Vec<Message>,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> Result<MessageEventStream>;

    /// Generate a complete response for `messages`
    async fn generate(
        &self,
        messages: Vec<Message>,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> Result<Generation> {
        let mut events = self.stream(messages, credentials, cancel.clone()).await?;
        let mut builder = MessageBuilder::new();

        while let Some(event) = events.next().await {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            builder.process_event(&event);
            if event.is_terminal() {
                break;
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        let (text, usage) = builder.finish()?;
        Ok(Generation { text, usage })
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if an error message describes a transient failure
pub fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    // Rate limits
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        return true;
    }
    // Transient network errors
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection") {
        return true;
    }
    // Server errors (5xx)
    if ["500", "502", "503", "504", "529"]
        .iter()
        .any(|code| lower.contains(code))
    {
        return true;
    }
    lower.contains("overloaded")
}

/// Opens a provider for one attempt
type ProviderFactory =
    Arc<dyn Fn(&reqwest::Client, &Credentials) -> Box<dyn LlmProvider> + Send + Sync>;

/// Generator backed by the real vendor HTTP APIs
pub struct ProviderGenerator {
    client: reqwest::Client,
    retry_config: RetryConfig,
    open_provider: ProviderFactory,
}

impl ProviderGenerator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            retry_config: RetryConfig::default(),
            open_provider: Arc::new(providers::provider_for),
        }
    }
}

impl Default for ProviderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for ProviderGenerator {
    async fn stream(
        &self,
        messages: Vec<Message>,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> Result<MessageEventStream> {
        if credentials.api_key.trim().is_empty() {
            return Err(Error::InvalidApiKey);
        }
        let model = credentials.resolve_model()?;
        let credentials = credentials.clone();
        let client = self.client.clone();
        let retry_config = self.retry_config.clone();
        let open_provider = Arc::clone(&self.open_provider);

        let event_stream: MessageEventStream = Box::pin(stream! {
            let mut attempt = 0u32;

            // Retry until the vendor produces something other than an error
            let (mut inner, first) = loop {
                if cancel.is_cancelled() {
                    yield MessageEvent::Error { message: Error::Aborted.to_string() };
                    return;
                }

                let provider = open_provider(&client, &credentials);
                let (failure, retryable) = match provider.stream(&model, &messages).await {
                    Ok(mut opened) => {
                        let mut first = opened.next().await;
                        if matches!(first, Some(MessageEvent::Start)) {
                            first = opened.next().await;
                        }
                        match first {
                            Some(MessageEvent::Error { message }) => {
                                let retryable = is_retryable_error(&message);
                                (message, retryable)
                            }
                            other => break (opened, other),
                        }
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let retryable = e.is_retryable() || is_retryable_error(&message);
                        (message, retryable)
                    }
                };

                if attempt < retry_config.max_retries && retryable {
                    let delay = retry_config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        retry_config.max_retries + 1,
                        failure,
                        delay
                    );
                    attempt += 1;
                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        yield MessageEvent::Error { message: Error::Aborted.to_string() };
                        return;
                    }
                    continue;
                }

                yield MessageEvent::Error { message: failure };
                return;
            };

            yield MessageEvent::Start;

            if let Some(event) = first {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    event = inner.next() => Some(event),
                };
                match next {
                    None => {
                        yield MessageEvent::Error { message: Error::Aborted.to_string() };
                        return;
                    }
                    Some(None) => break,
                    Some(Some(event)) => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                }
            }

            yield MessageEvent::Error {
                message: "stream ended before completion".to_string(),
            };
        });

        Ok(event_stream)
    }
}

/// Send a trivial prompt to check that `credentials` work.
///
/// Returns the model's reply on success.
pub async fn test_connection(
    generator: &dyn TextGenerator,
    credentials: &Credentials,
) -> Result<String> {
    tracing::debug!(vendor = %credentials.vendor, model = %credentials.model, "testing connection");
    let generation = generator
        .generate(
            vec![Message::user(CONNECTION_TEST_PROMPT)],
            credentials,
            CancellationToken::new(),
        )
        .await?;
    Ok(generation.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StopReason;
    use crate::vendor::Model;
    use crate::vendor::Vendor;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Vendor stand-in that plays one script per opened stream
    struct ScriptedProvider {
        scripts: Arc<Mutex<VecDeque<Vec<MessageEvent>>>>,
        opens: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn stream(
            &self,
            _model: &Model,
            _messages: &[Message],
        ) -> Result<MessageEventStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let events = self.scripts.lock().pop_front().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    /// A generator whose attempts replay `scripts` in order
    fn scripted_generator(
        scripts: Vec<Vec<MessageEvent>>,
    ) -> (ProviderGenerator, Arc<AtomicUsize>) {
        let scripts = Arc::new(Mutex::new(VecDeque::from(scripts)));
        let opens = Arc::new(AtomicUsize::new(0));
        let factory_opens = Arc::clone(&opens);
        let generator = ProviderGenerator {
            client: reqwest::Client::new(),
            retry_config: RetryConfig::default(),
            open_provider: Arc::new(move |_client: &reqwest::Client, _credentials: &Credentials| {
                Box::new(ScriptedProvider {
                    scripts: Arc::clone(&scripts),
                    opens: Arc::clone(&factory_opens),
                }) as Box<dyn LlmProvider>
            }),
        };
        (generator, opens)
    }

    async fn collect(generator: &ProviderGenerator, cancel: CancellationToken) -> Vec<MessageEvent> {
        generator
            .stream(vec![Message::user("q")], &creds(), cancel)
            .await
            .unwrap()
            .collect()
            .await
    }

    /// Replays a fixed list of events and records what it was asked
    struct ScriptedGenerator {
        events: Vec<MessageEvent>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedGenerator {
        fn new(events: Vec<MessageEvent>) -> Self {
            Self {
                events,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn stream(
            &self,
            messages: Vec<Message>,
            _credentials: &Credentials,
            _cancel: CancellationToken,
        ) -> Result<MessageEventStream> {
            self.seen.lock().push(messages);
            let events = self.events.clone();
            Ok(Box::pin(stream! {
                for event in events {
                    yield event;
                }
            }))
        }
    }

    fn creds() -> Credentials {
        Credentials::new(Vendor::ChatGpt, "gpt-4o-mini", "sk-test")
    }

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
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_retry_delay_backoff_and_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("HTTP 429: Too Many Requests"));
        assert!(is_retryable_error("HTTP 503: Service Unavailable"));
        assert!(is_retryable_error("Overloaded"));
        assert!(is_retryable_error("connection reset by peer"));
        assert!(!is_retryable_error("HTTP 401: invalid x-api-key"));
        assert!(!is_retryable_error("HTTP 400: bad request"));
    }

    #[tokio::test]
    async fn test_generate_collects_stream() {
        let generator = ScriptedGenerator::new(vec![
            MessageEvent::Start,
            MessageEvent::TextDelta { delta: "2".into() },
            done(12),
        ]);
        let generation = generator
            .generate(vec![Message::user("q")], &creds(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(generation.text, "2");
        assert_eq!(generation.usage.total_tokens(), Some(12));
    }

    #[tokio::test]
    async fn test_generate_surfaces_stream_error() {
        let generator = ScriptedGenerator::new(vec![MessageEvent::Error {
            message: "HTTP 401: bad key".into(),
        }]);
        let result = generator
            .generate(vec![Message::user("q")], &creds(), CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_generate_aborts_when_cancelled() {
        let generator = ScriptedGenerator::new(vec![
            MessageEvent::TextDelta { delta: "x".into() },
            done(1),
        ]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = generator
            .generate(vec![Message::user("q")], &creds(), cancel)
            .await;
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn test_connection_sends_fixed_prompt() {
        let generator = ScriptedGenerator::new(vec![
            MessageEvent::TextDelta { delta: "2".into() },
            done(3),
        ]);
        let reply = test_connection(&generator, &creds()).await.unwrap();
        assert_eq!(reply, "2");
        let seen = generator.seen.lock();
        assert_eq!(seen[0], vec![Message::user(CONNECTION_TEST_PROMPT)]);
    }

    #[tokio::test]
    async fn test_provider_generator_rejects_unknown_model() {
        let generator = ProviderGenerator::new();
        let bad = Credentials::new(Vendor::Claude, "gpt-5", "key");
        let result = generator
            .stream(vec![Message::user("hi")], &bad, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::UnknownModel { .. })));
    }

    #[tokio::test]
    async fn test_provider_generator_rejects_blank_key() {
        let generator = ProviderGenerator::new();
        let blank = Credentials::new(Vendor::ChatGpt, "gpt-5", "  ");
        let result = generator
            .stream(vec![Message::user("hi")], &blank, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::InvalidApiKey)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_generator_retries_transient_failure() {
        let (generator, opens) = scripted_generator(vec![
            vec![MessageEvent::Error {
                message: "HTTP 503: overloaded".into(),
            }],
            vec![
                MessageEvent::Start,
                MessageEvent::TextDelta { delta: "2".into() },
                done(5),
            ],
        ]);

        let events = collect(&generator, CancellationToken::new()).await;
        assert_eq!(
            events,
            vec![
                MessageEvent::Start,
                MessageEvent::TextDelta { delta: "2".into() },
                done(5),
            ]
        );
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_generator_does_not_retry_auth_failure() {
        let (generator, opens) = scripted_generator(vec![
            vec![MessageEvent::Error {
                message: "HTTP 401: invalid x-api-key".into(),
            }],
            vec![MessageEvent::Start, done(1)],
        ]);

        let events = collect(&generator, CancellationToken::new()).await;
        assert_eq!(
            events,
            vec![MessageEvent::Error {
                message: "HTTP 401: invalid x-api-key".into(),
            }]
        );
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_generator_cancel_during_backoff() {
        let (generator, opens) = scripted_generator(vec![
            vec![MessageEvent::Error {
                message: "HTTP 429: rate limit".into(),
            }],
            vec![MessageEvent::Start, done(1)],
        ]);
        let generator = Arc::new(generator);
        let cancel = CancellationToken::new();

        let consumer = {
            let generator = Arc::clone(&generator);
            let cancel = cancel.clone();
            tokio::spawn(async move { collect(&generator, cancel).await })
        };

        // First backoff is one second
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();

        let events = consumer.await.unwrap();
        assert_eq!(
            events,
            vec![MessageEvent::Error {
                message: Error::Aborted.to_string(),
            }]
        );
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }
}
