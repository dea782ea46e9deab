//! Vendor catalog and credentials

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Wire protocol family spoken by a vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    AnthropicMessages,
    OpenAICompletions,
    GoogleGenerativeAI,
}

/// Supported AI vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Claude,
    Gemini,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "xai")]
    XAi,
}

const CHATGPT_MODELS: &[&str] = &[
    "gpt-5",
    "gpt-5-pro",
    "gpt-5-mini",
    "gpt-5-nano",
    "chatgpt-4o-latest",
    "gpt-4o-mini",
];

const CLAUDE_MODELS: &[&str] = &[
    "claude-sonnet-4-5",
    "claude-opus-4-1",
    "claude-opus-4-0",
    "claude-sonnet-4-0",
    "claude-3-7-sonnet-latest",
    "claude-3-5-haiku-latest",
];

const GEMINI_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-1.5-pro-latest",
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash",
];

const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat"];

const XAI_MODELS: &[&str] = &["grok-4", "grok-3", "grok-3-fast", "grok-3-mini"];

impl Vendor {
    /// Every vendor, in display order
    pub const ALL: [Vendor; 5] = [
        Vendor::ChatGpt,
        Vendor::Claude,
        Vendor::Gemini,
        Vendor::DeepSeek,
        Vendor::XAi,
    ];

    /// Identifier used in settings files and on the command line
    pub fn id(&self) -> &'static str {
        match self {
            Vendor::ChatGpt => "chatgpt",
            Vendor::Claude => "claude",
            Vendor::Gemini => "gemini",
            Vendor::DeepSeek => "deepseek",
            Vendor::XAi => "xai",
        }
    }

    /// Get a human-readable name for this vendor
    pub fn name(&self) -> &'static str {
        match self {
            Vendor::ChatGpt => "ChatGPT",
            Vendor::Claude => "Claude",
            Vendor::Gemini => "Gemini",
            Vendor::DeepSeek => "DeepSeek",
            Vendor::XAi => "xAI",
        }
    }

    pub fn api(&self) -> Api {
        match self {
            Vendor::Claude => Api::AnthropicMessages,
            Vendor::Gemini => Api::GoogleGenerativeAI,
            Vendor::ChatGpt | Vendor::DeepSeek | Vendor::XAi => Api::OpenAICompletions,
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Vendor::ChatGpt => "https://api.openai.com/v1",
            Vendor::Claude => "https://api.anthropic.com",
            Vendor::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Vendor::DeepSeek => "https://api.deepseek.com/v1",
            Vendor::XAi => "https://api.x.ai/v1",
        }
    }

    /// Get the environment variable name for this vendor's API key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Vendor::ChatGpt => "OPENAI_API_KEY",
            Vendor::Claude => "ANTHROPIC_API_KEY",
            Vendor::Gemini => "GEMINI_API_KEY",
            Vendor::DeepSeek => "DEEPSEEK_API_KEY",
            Vendor::XAi => "XAI_API_KEY",
        }
    }

    /// Models offered by this vendor
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Vendor::ChatGpt => CHATGPT_MODELS,
            Vendor::Claude => CLAUDE_MODELS,
            Vendor::Gemini => GEMINI_MODELS,
            Vendor::DeepSeek => DEEPSEEK_MODELS,
            Vendor::XAi => XAI_MODELS,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Vendor::ChatGpt => "gpt-4o-mini",
            Vendor::Claude => "claude-3-7-sonnet-latest",
            Vendor::Gemini => "gemini-2.0-flash",
            Vendor::DeepSeek => "deepseek-chat",
            Vendor::XAi => "grok-3-fast",
        }
    }

    pub fn offers(&self, model: &str) -> bool {
        self.models().contains(&model)
    }

    /// Look up a model offered by this vendor
    pub fn model(&self, id: &str) -> Option<Model> {
        self.offers(id).then(|| Model {
            id: id.to_string(),
            vendor: *self,
            api: self.api(),
            base_url: self.base_url().to_string(),
            max_tokens: 4096,
        })
    }

    /// API key from this vendor's environment variable, if set
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(self.api_key_env_var())
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Vendor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Vendor::ALL
            .into_iter()
            .find(|v| v.id() == needle || v.name().to_lowercase() == needle)
            .ok_or_else(|| Error::api("unknown_vendor", format!("unknown vendor: {s}")))
    }
}

/// A concrete model endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "gpt-4o-mini")
    pub id: String,
    pub vendor: Vendor,
    /// API type to use
    pub api: Api,
    /// Base URL for API calls
    pub base_url: String,
    /// Maximum output tokens
    pub max_tokens: u32,
}

/// The vendor/model/credential triple needed to reach a model
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub vendor: Vendor,
    pub model: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(vendor: Vendor, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            vendor,
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Resolve the catalog entry for these credentials
    pub fn resolve_model(&self) -> crate::Result<Model> {
        self.vendor
            .model(&self.model)
            .ok_or_else(|| Error::UnknownModel {
                vendor: self.vendor.name().to_string(),
                model: self.model.clone(),
            })
    }
}

// Keeps API keys out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("vendor", &self.vendor)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_is_offered() {
        for vendor in Vendor::ALL {
            assert!(
                vendor.offers(vendor.default_model()),
                "{} default model missing from catalog",
                vendor
            );
        }
    }

    #[test]
    fn test_api_family() {
        assert_eq!(Vendor::Claude.api(), Api::AnthropicMessages);
        assert_eq!(Vendor::Gemini.api(), Api::GoogleGenerativeAI);
        assert_eq!(Vendor::DeepSeek.api(), Api::OpenAICompletions);
        assert_eq!(Vendor::XAi.api(), Api::OpenAICompletions);
    }

    #[test]
    fn test_parse_vendor() {
        assert_eq!("chatgpt".parse::<Vendor>().unwrap(), Vendor::ChatGpt);
        assert_eq!("Claude".parse::<Vendor>().unwrap(), Vendor::Claude);
        assert_eq!(" xAI ".parse::<Vendor>().unwrap(), Vendor::XAi);
        assert!("openrouter".parse::<Vendor>().is_err());
    }

    #[test]
    fn test_vendor_serde_ids_match_id() {
        for vendor in Vendor::ALL {
            let json = serde_json::to_string(&vendor).unwrap();
            assert_eq!(json, format!("\"{}\"", vendor.id()));
        }
    }

    #[test]
    fn test_resolve_model() {
        let creds = Credentials::new(Vendor::Gemini, "gemini-2.0-flash", "k");
        let model = creds.resolve_model().unwrap();
        assert_eq!(model.base_url, "https://generativelanguage.googleapis.com/v1beta");

        let bad = Credentials::new(Vendor::Claude, "gpt-5", "k");
        assert!(matches!(
            bad.resolve_model(),
            Err(Error::UnknownModel { .. })
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = Credentials::new(Vendor::ChatGpt, "gpt-5", "sk-secret");
        assert!(!format!("{:?}", creds).contains("sk-secret"));
    }
}
