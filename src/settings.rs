use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use once_cell::sync::Lazy;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = ".sarpay_settings.yaml";
const STORAGE_DIRNAME: &str = ".sarpay";
pub const STORAGE_DIR_ENV: &str = "SARPAY_STORAGE_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,

    #[serde(default = "default_auto_hide_ms")]
    pub auto_hide_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSettings>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_sync_debounce_ms() -> u64 {
    1000
}

fn default_auto_hide_ms() -> u64 {
    3000
}

fn default_table() -> String {
    crate::progress::remote::DEFAULT_TABLE.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            user_id: None,
            storage_dir: None,
            sync_debounce_ms: default_sync_debounce_ms(),
            auto_hide_ms: default_auto_hide_ms(),
            remote: None,
        }
    }
}

static SETTINGS: Lazy<RwLock<Settings>> = Lazy::new(|| RwLock::new(Settings::default()));

fn settings_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = settings_path() else {
        warn!("Could not determine home directory, using default settings");
        return;
    };

    if !path.exists() {
        info!(
            "Settings file not found at {:?}, creating with defaults",
            path
        );
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
        return;
    }

    match read_settings_file(&path) {
        Ok(mut settings) => {
            debug!("Loaded settings from {:?}", path);

            if settings.version < CURRENT_VERSION {
                migrate_settings(&mut settings);
                save_settings_to_file(&settings, &path);
            }

            if let Ok(mut global) = SETTINGS.write() {
                *global = settings;
            }
        }
        Err(e) => {
            error!("{e:#}");
        }
    }
}

pub fn read_settings_file(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {path:?}"))?;
    serde_yaml::from_str::<Settings>(&content)
        .with_context(|| format!("Failed to parse settings file {path:?}"))
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Future migrations go here:
    // if settings.version < 2 {
    //     migrate_v1_to_v2(settings);
    // }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = settings_path() else {
        warn!("Could not determine home directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    let content = match generate_settings_yaml(settings) {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to serialize settings: {e}");
            return;
        }
    };

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {:?}", path),
        Err(e) => error!("Failed to save settings to {:?}: {}", path, e),
    }
}

fn generate_settings_yaml(settings: &Settings) -> Result<String> {
    let mut content = serde_yaml::to_string(settings).context("Failed to encode settings")?;
    content.push('\n');
    content.push_str(REMOTE_TEMPLATE);
    Ok(content)
}

const REMOTE_TEMPLATE: &str = r#"# ============================================================================
# Remote progress sync
# ============================================================================
# Progress is always kept locally. To also sync it across devices, point
# `remote` at a PostgREST-compatible endpoint (e.g. a Supabase project):
#
# user_id: "your-user-id"
# remote:
#   url: "https://your-project.supabase.co"
#   api_key: "public-anon-key"
#   table: "reading_progress"
"#;

// Public API for accessing/modifying settings

pub fn get_user_id() -> Option<String> {
    SETTINGS.read().ok().and_then(|s| s.user_id.clone())
}

pub fn set_user_id(user_id: Option<String>) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.user_id = user_id;
    }
    save_settings();
}

pub fn get_remote() -> Option<RemoteSettings> {
    SETTINGS.read().ok().and_then(|s| s.remote.clone())
}

pub fn get_sync_debounce() -> Duration {
    let ms = SETTINGS
        .read()
        .map(|s| s.sync_debounce_ms)
        .unwrap_or_else(|_| default_sync_debounce_ms());
    Duration::from_millis(ms)
}

pub fn get_auto_hide_delay() -> Duration {
    let ms = SETTINGS
        .read()
        .map(|s| s.auto_hide_ms)
        .unwrap_or_else(|_| default_auto_hide_ms());
    Duration::from_millis(ms)
}

/// Storage directory: `$SARPAY_STORAGE_DIR`, then the setting, then `~/.sarpay`.
pub fn get_storage_dir() -> PathBuf {
    if let Ok(custom_dir) = std::env::var(STORAGE_DIR_ENV) {
        return PathBuf::from(custom_dir);
    }

    let configured = SETTINGS.read().ok().and_then(|s| s.storage_dir.clone());
    configured
        .or_else(|| home::home_dir().map(|home| home.join(STORAGE_DIRNAME)))
        .unwrap_or_else(|| PathBuf::from(STORAGE_DIRNAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings = serde_yaml::from_str("version: 1\n").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.sync_debounce_ms, 1000);
        assert_eq!(settings.auto_hide_ms, 3000);
    }

    #[test]
    fn test_remote_table_defaults() {
        let yaml = "remote:\n  url: \"https://example.invalid\"\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        let remote = settings.remote.unwrap();
        assert_eq!(remote.table, "reading_progress");
        assert_eq!(remote.api_key, None);
    }

    #[test]
    fn test_generated_file_reads_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILENAME);
        let settings = Settings {
            user_id: Some("reader-1".to_string()),
            auto_hide_ms: 2000,
            remote: Some(RemoteSettings {
                url: "https://example.invalid".to_string(),
                api_key: Some("anon".to_string()),
                table: "progress".to_string(),
            }),
            ..Settings::default()
        };

        save_settings_to_file(&settings, &path);
        let loaded = read_settings_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "sync_debounce_ms: [not a number").unwrap();
        assert!(read_settings_file(&path).is_err());
    }
}
