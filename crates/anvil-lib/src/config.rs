//! Launcher settings.
//! Loaded from a JSON file; missing keys fall back to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// URL Constants
pub const DEFAULT_META_URL: &str = "https://meta.prismlauncher.org/v1/";
pub const MODRINTH_API_URL: &str = "https://api.modrinth.com/v2";
pub const CURSEFORGE_API_URL: &str = "https://api.curseforge.com/v1";

pub const REQUEST_TIMEOUT_SECS: u64 = 120;
pub const LIST_LOAD_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CONCURRENT_TASKS: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub meta_url: String,
    /// Takes precedence over `meta_url` when non-empty.
    pub meta_url_override: Option<String>,
    pub data_dir: PathBuf,
    pub concurrent_tasks: usize,
    pub request_timeout_secs: u64,
    /// Upper bound for waiting on a version list before building search arguments.
    pub list_load_timeout_secs: u64,
    pub modrinth_api_url: String,
    pub curseforge_api_url: String,
    pub curseforge_api_key: Option<String>,
    pub user_agent: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            meta_url: DEFAULT_META_URL.to_string(),
            meta_url_override: None,
            data_dir: PathBuf::from("."),
            concurrent_tasks: DEFAULT_CONCURRENT_TASKS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            list_load_timeout_secs: LIST_LOAD_TIMEOUT_SECS,
            modrinth_api_url: MODRINTH_API_URL.to_string(),
            curseforge_api_url: CURSEFORGE_API_URL.to_string(),
            curseforge_api_key: None,
            user_agent: format!("Anvil/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl LauncherConfig {
    /// Read the config file, falling back to defaults when it is missing or broken.
    pub fn load(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<LauncherConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Config at {:?} is malformed ({}), using defaults", path, e);
                    LauncherConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {:?}, using defaults", path);
                LauncherConfig::default()
            }
            Err(e) => {
                log::warn!("Failed to read config at {:?}: {}", path, e);
                LauncherConfig::default()
            }
        };
        config.apply_env();
        config
    }

    /// Like [`LauncherConfig::load`], but first writes the defaults when no
    /// file exists yet so there is something to edit.
    pub fn load_or_init(path: &Path) -> Self {
        if !path.exists() {
            match LauncherConfig::default().save(path) {
                Ok(()) => log::info!("Wrote default config to {:?}", path),
                Err(e) => log::warn!("Could not write default config: {:#}", e),
            }
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir {:?}", parent))?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes).with_context(|| format!("Failed to write config {:?}", path))
    }

    fn apply_env(&mut self) {
        if self.curseforge_api_key.is_none() {
            if let Ok(key) = std::env::var("CURSEFORGE_API_KEY") {
                if !key.is_empty() {
                    self.curseforge_api_key = Some(key);
                }
            }
        }
    }

    /// Base URL entity filenames are resolved against.
    pub fn effective_meta_url(&self) -> &str {
        match self.meta_url_override.as_deref() {
            Some(url) if !url.trim().is_empty() => url,
            _ => &self.meta_url,
        }
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.data_dir.join("meta")
    }

    pub fn cache_index_path(&self) -> PathBuf {
        self.data_dir.join("metacache")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn list_load_timeout(&self) -> Duration {
        Duration::from_secs(self.list_load_timeout_secs)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrent_tasks.max(1)
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.request_timeout())
            .build()
            .context("Failed to build HTTP client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_override_wins_over_default_meta_url() {
        let mut config = LauncherConfig::default();
        assert_eq!(config.effective_meta_url(), DEFAULT_META_URL);

        config.meta_url_override = Some("   ".to_string());
        assert_eq!(config.effective_meta_url(), DEFAULT_META_URL);

        config.meta_url_override = Some("http://localhost:9000/meta/".to_string());
        assert_eq!(config.effective_meta_url(), "http://localhost:9000/meta/");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"concurrent_tasks": 2}"#).unwrap();

        let config = LauncherConfig::load(&path);
        assert_eq!(config.concurrent_tasks, 2);
        assert_eq!(config.meta_url, DEFAULT_META_URL);
        assert_eq!(config.list_load_timeout_secs, LIST_LOAD_TIMEOUT_SECS);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = LauncherConfig::load(&path);
        assert_eq!(config.concurrent_tasks, DEFAULT_CONCURRENT_TASKS);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = LauncherConfig {
            concurrent_tasks: 0,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = LauncherConfig::load(&path);
        assert_eq!(loaded.concurrent_tasks, 0);
        assert_eq!(loaded.concurrency(), 1);
    }

    #[test]
    fn test_missing_file_is_initialised_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anvil").join("config.json");

        let config = LauncherConfig::load_or_init(&path);
        assert_eq!(config.concurrent_tasks, DEFAULT_CONCURRENT_TASKS);
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["meta_url"], DEFAULT_META_URL);

        // An existing file is left alone.
        std::fs::write(&path, r#"{"concurrent_tasks": 3}"#).unwrap();
        assert_eq!(LauncherConfig::load_or_init(&path).concurrent_tasks, 3);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"concurrent_tasks": 3}"#
        );
    }
}
