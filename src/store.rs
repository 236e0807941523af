//! File-backed collaborators for the command-line binary.
//!
//! - [`ConfigServerRegistry`]: configured backends and the selected index
//! - [`ConfigNavigator`]: switches the selected backend and reports focus
//! - [`ConversationCache`]: conversations synced to `conversations.json`
//!
//! The registry and navigator share one [`SharedConfig`], so a switch made
//! through the navigator is visible to the next routing decision.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::router::{Conversation, ConversationLookup, Navigator, ServerRegistry};
use crate::ws::socket_url;

/// Configuration shared between the registry and the navigator.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Wrap a loaded configuration for sharing.
pub fn shared(config: Config) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// [`ServerRegistry`] over the configured backend list.
#[derive(Debug, Clone)]
pub struct ConfigServerRegistry {
    config: SharedConfig,
}

impl ConfigServerRegistry {
    /// Registry reading from `config`.
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }
}

impl ServerRegistry for ConfigServerRegistry {
    fn index_for_url(&self, socket_url: &str) -> Option<usize> {
        let config = self.config.read().ok()?;
        config.index_for_socket_url(socket_url)
    }

    fn selected_index(&self) -> usize {
        self.config
            .read()
            .map(|config| config.selected_server)
            .unwrap_or_default()
    }
}

/// [`Navigator`] that persists the selected backend.
///
/// There is no conversation view in the binary; focusing logs and prints
/// the conversation instead.
#[derive(Debug, Clone)]
pub struct ConfigNavigator {
    config: SharedConfig,
    config_path: Option<PathBuf>,
}

impl ConfigNavigator {
    /// Navigator that also writes every selection change to `config_path`.
    ///
    /// Only `selected_server` is written; the rest of the file is untouched.
    pub fn new(config: SharedConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path: Some(config_path),
        }
    }

    /// Navigator that only updates the in-memory selection.
    pub fn in_memory(config: SharedConfig) -> Self {
        Self {
            config,
            config_path: None,
        }
    }
}

impl Navigator for ConfigNavigator {
    fn change_selected_server(&self, index: usize) {
        match self.config.write() {
            Ok(mut config) => config.selected_server = index,
            Err(e) => {
                log::warn!("[Navigator] Config lock poisoned: {e}");
                return;
            }
        }

        if let Some(path) = &self.config_path {
            if let Err(e) = Config::persist_selected_server(path, index) {
                log::warn!("[Navigator] Failed to persist server selection: {e:#}");
            }
        }
        log::info!("[Navigator] Selected server {index}");
    }

    fn focus_conversation(&self, conversation: &Conversation) {
        let label = conversation.name.as_deref().unwrap_or(&conversation.id);
        log::info!(
            "[Navigator] Focused conversation {label} ({})",
            conversation.kind.tag()
        );
        println!("focus {label}");
    }
}

/// Conversations per backend, as last synced by the client.
///
/// The file maps backend addresses to conversation lists:
///
/// ```json
/// { "https://chat.example.com": [ { "id": "GENERAL", "kind": "c", "name": "general" } ] }
/// ```
///
/// Addresses are normalized with [`socket_url`] and matched against the
/// configured backends, so the file may use any accepted address form.
#[derive(Debug, Default)]
pub struct ConversationCache {
    by_server: HashMap<usize, Vec<Conversation>>,
}

impl ConversationCache {
    /// Load `conversations.json` from the config directory.
    pub fn load(config: &Config) -> Result<Self> {
        let path = Config::config_dir()?.join("conversations.json");
        Self::load_from(&path, config)
    }

    /// Load a cache file. A missing file is an empty cache.
    pub fn load_from(path: &Path, config: &Config) -> Result<Self> {
        if !path.exists() {
            log::debug!("[Conversations] No cache at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw: HashMap<String, Vec<Conversation>> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid conversation cache at {}", path.display()))?;
        Ok(Self::from_entries(raw, config))
    }

    /// Build a cache from address-keyed entries, dropping unknown backends.
    pub fn from_entries(entries: HashMap<String, Vec<Conversation>>, config: &Config) -> Self {
        let mut by_server: HashMap<usize, Vec<Conversation>> = HashMap::new();
        for (address, conversations) in entries {
            let index = socket_url(&address).and_then(|url| config.index_for_socket_url(&url));
            match index {
                Some(index) => by_server.entry(index).or_default().extend(conversations),
                None => log::debug!("[Conversations] Ignoring unconfigured server {address}"),
            }
        }
        Self { by_server }
    }
}

impl ConversationLookup for ConversationCache {
    fn conversation_for_notification(
        &self,
        server_index: usize,
        conversation_id: &str,
    ) -> Option<Conversation> {
        self.by_server
            .get(&server_index)?
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }
}
