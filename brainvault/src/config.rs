//! Application configuration
//!
//! Central location for configuration constants, validation boundaries,
//! and the environment-driven backend selection. Loading fails fast:
//! a misconfigured vault never starts.

use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::time::Duration;

// ===== Autosave =====

/// Quiet period after the last edit before a note is written
pub const DEFAULT_AUTO_SAVE_DELAY_MS: u64 = 800;

/// Minimum auto-save delay in milliseconds.
/// Values below this turn the debounce into a write per keystroke.
pub const MIN_AUTO_SAVE_DELAY_MS: u64 = 100;

/// Maximum auto-save delay in milliseconds (5 minutes).
/// Values above this risk data loss on unexpected shutdown.
pub const MAX_AUTO_SAVE_DELAY_MS: u64 = 300_000;

// ===== Entity defaults =====

/// Title given to notes created without one
pub const DEFAULT_NOTE_TITLE: &str = "Untitled Note";

/// Display color given to tags created without one
pub const DEFAULT_TAG_COLOR: &str = "#3b82f6";

/// Maximum length kept from an uploaded file name
pub const MAX_FILE_NAME_LENGTH: usize = 255;

// ===== Storage =====

/// Object-store bucket holding uploaded files
pub const DEFAULT_BUCKET: &str = "public-files";

// ===== Environment keys =====

pub const ENV_REMOTE_URL: &str = "SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_BUCKET: &str = "BRAINVAULT_BUCKET";
pub const ENV_AUTO_SAVE_MS: &str = "BRAINVAULT_AUTOSAVE_MS";
pub const ENV_LOCAL_DIR: &str = "BRAINVAULT_LOCAL_DIR";

/// Which backend the vault talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Hosted identity/table/storage services
    Hosted {
        url: reqwest::Url,
        anon_key: String,
        bucket: String,
    },
    /// SQLite database and filesystem objects under a data directory
    Local { data_dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub auto_save_delay: Duration,
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// `BRAINVAULT_LOCAL_DIR` selects the local backend; otherwise both
    /// `SUPABASE_URL` and `SUPABASE_ANON_KEY` are required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match non_empty(ENV_LOCAL_DIR) {
            Some(dir) => BackendConfig::Local {
                data_dir: PathBuf::from(dir),
            },
            None => {
                let (url, anon_key) = match (non_empty(ENV_REMOTE_URL), non_empty(ENV_ANON_KEY)) {
                    (Some(url), Some(key)) => (url, key),
                    _ => {
                        return Err(AppError::Config(format!(
                            "Missing remote store environment variables ({} and {} are required)",
                            ENV_REMOTE_URL, ENV_ANON_KEY
                        )))
                    }
                };

                let url = reqwest::Url::parse(url.trim())
                    .map_err(|e| AppError::Config(format!("Invalid {}: {}", ENV_REMOTE_URL, e)))?;

                BackendConfig::Hosted {
                    url,
                    anon_key: anon_key.trim().to_string(),
                    bucket: non_empty(ENV_BUCKET).unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
                }
            }
        };

        let auto_save_delay = match non_empty(ENV_AUTO_SAVE_MS) {
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|_| {
                    AppError::Config(format!("{} must be a whole number of milliseconds", ENV_AUTO_SAVE_MS))
                })?;
                validate_auto_save_delay(ms)?
            }
            None => Duration::from_millis(DEFAULT_AUTO_SAVE_DELAY_MS),
        };

        Ok(Self {
            backend,
            auto_save_delay,
        })
    }

    /// Configuration for a local backend with default behavior settings
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Local {
                data_dir: data_dir.into(),
            },
            auto_save_delay: Duration::from_millis(DEFAULT_AUTO_SAVE_DELAY_MS),
        }
    }
}

/// Check an auto-save delay against the supported bounds
pub fn validate_auto_save_delay(ms: u64) -> Result<Duration> {
    if !(MIN_AUTO_SAVE_DELAY_MS..=MAX_AUTO_SAVE_DELAY_MS).contains(&ms) {
        return Err(AppError::Config(format!(
            "Auto-save delay must be between {} and {} ms, got {}",
            MIN_AUTO_SAVE_DELAY_MS, MAX_AUTO_SAVE_DELAY_MS, ms
        )));
    }
    Ok(Duration::from_millis(ms))
}
