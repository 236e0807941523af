//! Configuration loading and persistence.
//!
//! Holds the configured backends (in display order), which of them is
//! selected, and the application identity sent with push announcements.
//! Session tokens are not stored here; see [`crate::credentials`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ws::socket_url;

/// One configured backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address as entered by the user (`https://chat.example.com`).
    pub url: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ServerConfig {
    /// Canonical socket URL of this backend, if the address is valid.
    pub fn socket_url(&self) -> Option<String> {
        socket_url(&self.url)
    }
}

/// Configuration for the push router.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Config {
    /// Configured backends, in order. Indices are stable server identifiers.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Index of the selected backend.
    #[serde(default)]
    pub selected_server: usize,
    /// Application identity for push announcements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/push-router-test`
    /// 2. `PUSH_ROUTER_CONFIG_DIR` env var: explicit override
    /// 3. `PUSH_ROUTER_ENV=test`: `tmp/push-router-test`
    /// 4. Default: platform config dir (macOS: ~/Library/Application Support/push-router)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/push-router-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(custom_dir) = std::env::var("PUSH_ROUTER_CONFIG_DIR") {
                    PathBuf::from(custom_dir)
                } else if crate::env::Environment::current().is_test() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/push-router-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("push-router")
                }
            }
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Path of the configuration file.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file(&Self::config_path()?)?.unwrap_or_default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from file only. Use this before modifying and saving.
    pub fn load_without_overrides() -> Result<Self> {
        Ok(Self::load_from_file(&Self::config_path()?)?.unwrap_or_default())
    }

    fn load_from_file(config_path: &Path) -> Result<Option<Self>> {
        if !config_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(config_path)?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config at {}", config_path.display()))?;
        Ok(Some(config))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(app_name) = std::env::var("PUSH_ROUTER_APP_NAME") {
            self.app_name = Some(app_name);
        }

        if let Ok(selected) = std::env::var("PUSH_ROUTER_SELECTED_SERVER") {
            if let Ok(index) = selected.parse::<usize>() {
                self.selected_server = index;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn save_to(&self, config_path: &Path) -> Result<()> {
        fs::write(config_path, serde_json::to_string_pretty(self)?)?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Rewrite only `selected_server` in the file at `config_path`.
    ///
    /// Everything else is taken from the file itself, so environment
    /// overrides applied to an in-memory copy never leak to disk.
    pub fn persist_selected_server(config_path: &Path, index: usize) -> Result<()> {
        let mut on_disk = Self::load_from_file(config_path)?.unwrap_or_default();
        on_disk.selected_server = index;
        on_disk.save_to(config_path)
    }

    /// The selected backend, if the index points at one.
    pub fn selected(&self) -> Option<&ServerConfig> {
        self.servers.get(self.selected_server)
    }

    /// Index of the backend whose canonical socket URL equals `url`.
    ///
    /// Configured addresses are normalized before comparing, so entries may be
    /// stored in any accepted form.
    pub fn index_for_socket_url(&self, url: &str) -> Option<usize> {
        self.servers
            .iter()
            .position(|server| server.socket_url().as_deref() == Some(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(url: &str) -> ServerConfig {
        ServerConfig {
            url: url.to_string(),
            name: None,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.selected_server, 0);
        assert!(config.selected().is_none());
        assert!(config.app_name.is_none());
    }

    #[test]
    fn test_index_for_socket_url_normalizes_entries() {
        let config = Config {
            servers: vec![server("https://one.example.com/"), server("two.example.com")],
            selected_server: 0,
            app_name: None,
        };

        assert_eq!(
            config.index_for_socket_url("wss://one.example.com/websocket"),
            Some(0)
        );
        assert_eq!(
            config.index_for_socket_url("wss://two.example.com/websocket"),
            Some(1)
        );
        assert_eq!(
            config.index_for_socket_url("wss://three.example.com/websocket"),
            None
        );
    }

    #[test]
    fn test_invalid_entries_never_match() {
        let config = Config {
            servers: vec![server("ftp://one.example.com")],
            ..Config::default()
        };
        assert_eq!(
            config.index_for_socket_url("wss://one.example.com/websocket"),
            None
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"servers":[{"url":"https://a.example.com"}]}"#).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.selected_server, 0);
        assert_eq!(config.selected().unwrap().url, "https://a.example.com");
    }

    #[test]
    fn test_persist_selected_server_keeps_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let on_disk = Config {
            servers: vec![server("https://one.example.com"), server("two.example.com")],
            selected_server: 0,
            app_name: None,
        };
        on_disk.save_to(&path).unwrap();

        Config::persist_selected_server(&path, 1).unwrap();

        let reloaded = Config::load_from_file(&path).unwrap().unwrap();
        assert_eq!(reloaded.selected_server, 1);
        assert_eq!(reloaded.servers, on_disk.servers);
        assert!(reloaded.app_name.is_none());
    }

    #[test]
    fn test_persist_selected_server_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        Config::persist_selected_server(&path, 2).unwrap();

        let reloaded = Config::load_from_file(&path).unwrap().unwrap();
        assert_eq!(reloaded.selected_server, 2);
        assert!(reloaded.servers.is_empty());
    }

    #[test]
    fn test_serialization_skips_empty_optionals() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(!json.contains("app_name"));
    }
}
