//! Per-server session credentials.
//!
//! Every configured backend may have one logged-in session: the user id the
//! backend assigned and the resume token for its socket/REST API. All
//! sessions live in a single keyring entry so the OS prompts at most once.
//!
//! # Storage
//!
//! Production: OS keyring entry `push-router/sessions` containing JSON.
//! Test mode: File at `{config_dir}/sessions.json`.
//!
//! Keyring failures degrade to "no sessions": push announcements are then
//! skipped until the user logs in again, which is the same outcome as a
//! first run.

use anyhow::Result;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::registration::SessionProvider;

/// Keyring service name.
const KEYRING_SERVICE: &str = "push-router";
/// Consolidated keyring entry name.
const KEYRING_SESSIONS: &str = "sessions";

/// Number of retry attempts for keyring access.
const KEYRING_RETRY_ATTEMPTS: u32 = 2;
/// Delay between retry attempts in milliseconds.
const KEYRING_RETRY_DELAY_MS: u64 = 500;

/// Categorized keyring access errors.
#[derive(Debug)]
pub enum KeyringAccessError {
    /// Entry does not exist (normal for first run).
    NotFound,
    /// Keyring is locked or access was denied.
    Unavailable(String),
    /// Data exists but is unparseable.
    Corrupted(String),
}

impl std::fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "Keyring entry not found"),
            Self::Unavailable(msg) => write!(f, "Keyring unavailable: {msg}"),
            Self::Corrupted(msg) => write!(f, "Keyring data corrupted: {msg}"),
        }
    }
}

impl std::error::Error for KeyringAccessError {}

fn categorize_keyring_error(err: &keyring::Error) -> KeyringAccessError {
    match err {
        keyring::Error::NoEntry => KeyringAccessError::NotFound,
        other => KeyringAccessError::Unavailable(format!("{other:?}")),
    }
}

fn should_skip_keyring() -> bool {
    #[cfg(test)]
    {
        true
    }

    #[cfg(not(test))]
    {
        crate::env::should_skip_keyring()
    }
}

fn sessions_file_path() -> Result<PathBuf> {
    Config::config_dir().map(|d| d.join("sessions.json"))
}

/// Logged-in session on one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Backend-assigned user id.
    pub user_id: String,
    /// Resume token for the socket and REST API.
    pub auth_token: String,
}

/// All sessions, keyed by canonical socket URL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    sessions: HashMap<String, Session>,

    /// Schema version for future migrations.
    #[serde(default = "default_version")]
    pub version: u8,
}

fn default_version() -> u8 {
    1
}

impl Credentials {
    /// Load from keyring (or file in test mode). Never fails on a missing entry.
    pub fn load() -> Result<Self> {
        if should_skip_keyring() {
            return Self::load_from_file();
        }
        Ok(Self::load_from_keyring_with_retry())
    }

    fn load_from_keyring_with_retry() -> Self {
        let mut last_error: Option<KeyringAccessError> = None;

        for attempt in 0..KEYRING_RETRY_ATTEMPTS {
            if attempt > 0 {
                log::debug!(
                    "Retrying keyring access (attempt {}/{})",
                    attempt + 1,
                    KEYRING_RETRY_ATTEMPTS
                );
                thread::sleep(Duration::from_millis(KEYRING_RETRY_DELAY_MS));
            }

            match Self::try_load_from_keyring() {
                Ok(creds) => return creds,
                Err(KeyringAccessError::NotFound) => {
                    log::debug!("No sessions in keyring, returning empty");
                    return Self::default();
                }
                Err(err @ KeyringAccessError::Corrupted(_)) => {
                    log::warn!("{err}, returning empty sessions");
                    return Self::default();
                }
                Err(err) => last_error = Some(err),
            }
        }

        if let Some(err) = last_error {
            log::warn!(
                "Keyring access failed after {} attempts: {}. Log in again to announce push registration.",
                KEYRING_RETRY_ATTEMPTS,
                err
            );
        }
        Self::default()
    }

    fn try_load_from_keyring() -> std::result::Result<Self, KeyringAccessError> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_SESSIONS)
            .map_err(|e| KeyringAccessError::Unavailable(format!("Failed to create entry: {e:?}")))?;

        let json = entry
            .get_password()
            .map_err(|e| categorize_keyring_error(&e))?;
        serde_json::from_str(&json)
            .map_err(|e| KeyringAccessError::Corrupted(format!("JSON parse error: {e}")))
    }

    fn load_from_file() -> Result<Self> {
        let path = sessions_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to keyring (or file in test mode).
    pub fn save(&self) -> Result<()> {
        if should_skip_keyring() {
            return self.save_to_file();
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_SESSIONS)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;
        entry
            .set_password(&serde_json::to_string(self)?)
            .map_err(|e| anyhow::anyhow!("Failed to store sessions in keyring: {e:?}"))?;

        log::info!("Saved sessions to OS keyring");
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        let path = sessions_file_path()?;
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Session for a backend, if logged in.
    pub fn session(&self, socket_url: &str) -> Option<&Session> {
        self.sessions.get(socket_url)
    }

    /// Store the session for a backend.
    pub fn set_session(&mut self, socket_url: String, session: Session) {
        self.sessions.insert(socket_url, session);
    }

    /// Forget the session for a backend.
    pub fn remove_session(&mut self, socket_url: &str) {
        self.sessions.remove(socket_url);
    }
}

/// [`SessionProvider`] for one backend, backed by loaded credentials.
#[derive(Debug, Clone)]
pub struct StoredSession {
    session: Option<Session>,
}

impl StoredSession {
    /// Session of the backend at `socket_url`.
    pub fn for_server(credentials: &Credentials, socket_url: &str) -> Self {
        Self {
            session: credentials.session(socket_url).cloned(),
        }
    }

    /// Resume token, if logged in.
    pub fn auth_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.auth_token.as_str())
    }
}

impl SessionProvider for StoredSession {
    fn authenticated_user_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.user_id.clone())
    }
}
