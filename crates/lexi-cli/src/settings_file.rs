//! Settings file support
//!
//! Settings live in `~/.config/lexi/settings.toml` (or the platform's config
//! directory) with owner-only permissions, since they hold the API key.

use async_trait::async_trait;
use lexi_ai::Credentials;
use lexi_chat::{Error, Result, Settings, SettingsStore};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, broadcast};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Settings persisted as TOML.
///
/// A session may run with credentials from the command line; those are
/// overlaid on every read and never written back.
pub struct FileSettingsStore {
    path: PathBuf,
    persisted: Mutex<Settings>,
    session_credentials: Option<Credentials>,
    change_tx: broadcast::Sender<Settings>,
}

impl FileSettingsStore {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lexi")
    }

    /// Get the settings file path
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("LEXI_SETTINGS_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("settings.toml")
    }

    /// Open the store at `path`, starting from defaults if the file is
    /// missing or unreadable
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = read_settings(&path).await;
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path,
            persisted: Mutex::new(settings),
            session_credentials: None,
            change_tx,
        }
    }

    /// Use `credentials` for this session without saving them
    pub fn with_session_credentials(mut self, credentials: Credentials) -> Self {
        self.session_credentials = Some(credentials);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn overlay(&self, settings: &Settings) -> Settings {
        let mut settings = settings.clone();
        if let Some(credentials) = &self.session_credentials {
            settings.set_credentials(credentials);
        }
        settings
    }

    async fn write(&self, settings: &Settings) -> Result<()> {
        let content = toml::to_string_pretty(settings)
            .map_err(|e| Error::Settings(format!("failed to serialize settings: {e}")))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
                tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
                #[cfg(unix)]
                tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                    .await
                    .map_err(io_error(dir))?;
            }
        }

        tokio::fs::write(&self.path, content)
            .await
            .map_err(io_error(&self.path))?;

        // Owner read/write only
        #[cfg(unix)]
        tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_error(&self.path))?;

        Ok(())
    }
}

async fn read_settings(path: &Path) -> Settings {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
        Err(e) => {
            eprintln!("Warning: Failed to read settings file: {}", e);
            return Settings::default();
        }
    };

    match toml::from_str::<Settings>(&content) {
        Ok(settings) => settings.normalized(),
        Err(e) => {
            eprintln!("Warning: Failed to parse settings file: {}", e);
            Settings::default()
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |e| Error::Settings(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<Settings> {
        let persisted = self.persisted.lock().await;
        Ok(self.overlay(&persisted))
    }

    async fn update(&self, change: Box<dyn for<'a> FnOnce(&'a mut Settings) + Send>) -> Result<Settings> {
        let mut persisted = self.persisted.lock().await;
        let mut next = persisted.clone();
        change(&mut next);
        self.write(&next).await?;
        *persisted = next;

        let visible = self.overlay(&persisted);
        tracing::debug!(path = %self.path.display(), "settings saved");
        let _ = self.change_tx.send(visible.clone());
        Ok(visible)
    }

    fn subscribe(&self) -> broadcast::Receiver<Settings> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexi_ai::Vendor;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("lexi-settings-{}", uuid::Uuid::new_v4()))
            .join("settings.toml")
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let store = FileSettingsStore::open(scratch_path()).await;
        assert_eq!(store.load().await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let path = scratch_path();
        let store = FileSettingsStore::open(&path).await;
        let credentials = Credentials::new(Vendor::Claude, "claude-3-5-haiku-latest", "sk-ant");

        let saved = store
            .update(Box::new(move |s: &mut Settings| {
                s.set_credentials(&credentials);
                s.token_usage = 42;
            }))
            .await
            .unwrap();
        assert_eq!(saved.token_usage, 42);

        let reopened = FileSettingsStore::open(&path).await;
        let settings = reopened.load().await.unwrap();
        assert_eq!(settings.token_usage, 42);
        assert_eq!(settings.vendor, Some(Vendor::Claude));
        assert_eq!(settings.api_key.as_deref(), Some("sk-ant"));

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_vendor_and_model_dropped() {
        let path = scratch_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "vendor = \"mystery\"\nmodel = \"gpt-4o-mini\"\ntoken_usage = 7\n",
        )
        .unwrap();

        let settings = FileSettingsStore::open(&path).await.load().await.unwrap();
        assert_eq!(settings.vendor, None);
        assert_eq!(settings.model, None);
        assert_eq!(settings.token_usage, 7);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_session_credentials_are_not_written() {
        let path = scratch_path();
        let credentials = Credentials::new(Vendor::Gemini, "gemini-2.0-flash", "from-flag");
        let store = FileSettingsStore::open(&path)
            .await
            .with_session_credentials(credentials.clone());

        assert_eq!(store.load().await.unwrap().credentials(), Some(credentials));
        store
            .update(Box::new(|s: &mut Settings| s.forgetful_mode = true))
            .await
            .unwrap();

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(!on_disk.contains("from-flag"));
        assert!(on_disk.contains("forgetful_mode = true"));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
