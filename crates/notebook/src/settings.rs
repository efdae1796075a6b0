//! Settings persistence for notebook behaviour.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/cellbook/settings.json
//! - Linux: ~/.config/cellbook/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\cellbook\settings.json
//!
//! `CELLBOOK_SETTINGS` overrides the location.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Code placed in the single cell of a brand new notebook.
pub const DEFAULT_PLACEHOLDER_CODE: &str = "// New notebook. Insert code here.";

/// Time a cell stays `updating` after the VM reports completion.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;

const DEFAULT_RECENT_LIMIT: usize = 30;

/// Environment variable overriding the settings file path.
pub const SETTINGS_PATH_ENV: &str = "CELLBOOK_SETTINGS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookSettings {
    /// Settle delay in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Code for the first cell of an empty notebook
    #[serde(default = "default_placeholder_code")]
    pub placeholder_code: String,

    /// Where the file store keeps documents (default: data dir)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// How many notebooks `list_recent` returns
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_placeholder_code() -> String {
    DEFAULT_PLACEHOLDER_CODE.to_string()
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

impl Default for NotebookSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            placeholder_code: default_placeholder_code(),
            store_dir: None,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl NotebookSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Configured store directory, or `<data_dir>/cellbook/notebooks`.
    pub fn resolved_store_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cellbook")
                .join("notebooks")
        })
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cellbook")
        .join("settings.json")
}

/// Load settings from disk, returning defaults if the file doesn't exist
/// or can't be parsed
pub fn load_settings() -> NotebookSettings {
    let path = settings_path();
    if path.exists() {
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        NotebookSettings::default()
    }
}

/// Save settings to disk
pub fn save_settings(settings: &NotebookSettings) -> Result<()> {
    let path = settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
