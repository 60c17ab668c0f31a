//! Settings file (JSON) loading and saving

use crate::error::DlgateError;
use dlgate_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// JSON-backed settings file
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `settings.json` inside the platform config directory
    pub fn default_location() -> Self {
        let dir = dirs::config_dir()
            .map(|d| d.join("dlgate"))
            .unwrap_or_else(|| PathBuf::from(".dlgate"));
        Self::new(dir.join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings. A missing file yields defaults; unknown fields are
    /// ignored and missing fields take their default.
    pub async fn load(&self) -> Result<Settings, DlgateError> {
        if !self.path.exists() {
            debug!("No settings at {}, using defaults", self.path.display());
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.path).await?;
        let settings: Settings = serde_json::from_str(&content)?;
        validate_settings(&settings)?;
        Ok(settings)
    }

    /// Save settings, creating the parent directory if needed
    pub async fn save(&self, settings: &Settings) -> Result<(), DlgateError> {
        validate_settings(settings)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content).await?;

        Ok(())
    }
}

/// Reject values the engine cannot run with
pub fn validate_settings(settings: &Settings) -> Result<(), DlgateError> {
    if settings.max_concurrent_downloads == 0 {
        return Err(DlgateError::Config(
            "max_concurrent_downloads must be at least 1".to_string(),
        ));
    }
    if settings.user_agent.as_str().trim().is_empty() {
        return Err(DlgateError::Config("user_agent must not be empty".to_string()));
    }
    Ok(())
}
