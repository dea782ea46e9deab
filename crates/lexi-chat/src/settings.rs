//! Persistent user settings and the store they live in

use async_trait::async_trait;
use lexi_ai::{Credentials, Vendor};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// System prompt used until the user writes their own
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("default_prompt.md");

/// Everything that outlives a conversation.
///
/// Missing fields take their defaults, and vendor or model names that the
/// catalog does not know are dropped to `None` (see [`Settings::normalized`]).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub system_prompt: String,
    /// Hide all context and never summarize
    pub forgetful_mode: bool,
    /// Warn once cumulative usage reaches this many tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cap: Option<u64>,
    /// Cumulative tokens reported by the vendors
    pub token_usage: u64,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_vendor"
    )]
    pub vendor: Option<Vendor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            forgetful_mode: false,
            token_cap: None,
            token_usage: 0,
            vendor: None,
            model: None,
            api_key: None,
        }
    }
}

impl Settings {
    /// The vendor/model/credential triple, if all three are present
    pub fn credentials(&self) -> Option<Credentials> {
        let vendor = self.vendor?;
        let model = self.model.as_deref().filter(|m| vendor.offers(m))?;
        let api_key = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        Some(Credentials::new(vendor, model, api_key))
    }

    /// Store a tested connection
    pub fn set_credentials(&mut self, credentials: &Credentials) {
        self.vendor = Some(credentials.vendor);
        self.model = Some(credentials.model.clone());
        self.api_key = Some(credentials.api_key.clone());
    }

    /// Drop a model that does not belong to the configured vendor
    pub fn normalized(mut self) -> Self {
        let keep_model = match (self.vendor, self.model.as_deref()) {
            (Some(vendor), Some(model)) => vendor.offers(model),
            _ => false,
        };
        if !keep_model {
            self.model = None;
        }
        self
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("system_prompt_len", &self.system_prompt.len())
            .field("forgetful_mode", &self.forgetful_mode)
            .field("token_cap", &self.token_cap)
            .field("token_usage", &self.token_usage)
            .field("vendor", &self.vendor)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn lenient_vendor<'de, D>(deserializer: D) -> std::result::Result<Option<Vendor>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|name| match name.parse() {
        Ok(vendor) => Some(vendor),
        Err(_) => {
            tracing::warn!("Ignoring unknown vendor '{}' in settings", name);
            None
        }
    }))
}

/// Async key-value home of [`Settings`], with change notification.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the current settings
    async fn load(&self) -> Result<Settings>;

    /// Apply `change` atomically and persist the result
    async fn update(&self, change: Box<dyn for<'a> FnOnce(&'a mut Settings) + Send>) -> Result<Settings>;

    /// Receive every settings value written after this call
    fn subscribe(&self) -> broadcast::Receiver<Settings>;

    /// Replace the settings wholesale
    async fn save(&self, settings: Settings) -> Result<Settings> {
        self.update(Box::new(move |current: &mut Settings| *current = settings)).await
    }
}

/// In-memory store, for tests and one-shot sessions
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
    change_tx: broadcast::Sender<Settings>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            settings: Mutex::new(settings),
            change_tx,
        }
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Settings> {
        Ok(self.settings.lock().clone())
    }

    async fn update(&self, change: Box<dyn for<'a> FnOnce(&'a mut Settings) + Send>) -> Result<Settings> {
        let updated = {
            let mut settings = self.settings.lock();
            change(&mut settings);
            settings.clone()
        };
        let _ = self.change_tx.send(updated.clone());
        Ok(updated)
    }

    fn subscribe(&self) -> broadcast::Receiver<Settings> {
        self.change_tx.subscribe()
    }
}
