//! lexi-ai: vendor catalog and streaming text generation
//!
//! This crate knows how to talk to the supported AI vendors (ChatGPT, Claude,
//! Gemini, DeepSeek, xAI) and exposes them behind the [`TextGenerator`]
//! capability used by the conversation core.

pub mod error;
pub mod generator;
pub mod providers;
pub mod stream;
pub mod types;
pub mod vendor;

pub use error::{Error, Result};
pub use generator::{
    CONNECTION_TEST_PROMPT, Generation, ProviderGenerator, RetryConfig, TextGenerator,
    test_connection,
};
pub use stream::{MessageEvent, MessageEventStream};
pub use types::*;
pub use vendor::{Api, Credentials, Model, Vendor};
