//! Push registration identity.
//!
//! Owns the two values this installation needs to register for push
//! delivery:
//!
//! - the **registration id**, generated locally once and kept for as long as
//!   the backing store survives,
//! - the **device token**, the last token the platform handed us.
//!
//! Both live in a simple [`KeyValueStore`]. [`FileStore`] writes through on
//! every `set`, so an id created right before a crash is not lost.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Key holding the last recorded device token.
pub const DEVICE_TOKEN_KEY: &str = "deviceToken";
/// Key holding the registration id.
pub const REGISTRATION_ID_KEY: &str = "pushIdentifier";

/// Minimal durable string storage.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, durably, before returning.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store, used by tests and by embedders with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|e| anyhow::anyhow!("memory store poisoned: {e}"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| anyhow::anyhow!("memory store poisoned: {e}"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON object file, rewritten in full on every `set`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (lazily) a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `{config_dir}/push.json`.
    pub fn in_config_dir() -> Result<Self> {
        Ok(Self::new(crate::config::Config::config_dir()?.join("push.json")))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupted push store at {}", self.path.display()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| anyhow::anyhow!("file store lock poisoned: {e}"))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| anyhow::anyhow!("file store lock poisoned: {e}"))?;

        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create push store directory")?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&values)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

/// Registration id and device token over a [`KeyValueStore`].
pub struct IdentityStore<S> {
    store: S,
    // Makes get-or-create atomic for concurrent first callers.
    create_lock: Mutex<()>,
}

impl<S> std::fmt::Debug for IdentityStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> IdentityStore<S> {
    /// Wrap a key-value store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            create_lock: Mutex::new(()),
        }
    }

    /// Return the persisted registration id, creating and persisting one if absent.
    ///
    /// Once created, the id is never regenerated while it is present in the store.
    pub fn get_or_create_registration_id(&self) -> Result<String> {
        let _guard = self
            .create_lock
            .lock()
            .map_err(|e| anyhow::anyhow!("identity lock poisoned: {e}"))?;

        if let Some(id) = self.store.get(REGISTRATION_ID_KEY)? {
            return Ok(id);
        }

        let id = generate_registration_id();
        self.store
            .set(REGISTRATION_ID_KEY, &id)
            .context("Failed to persist registration id")?;
        log::info!("[Push] Created registration id {}", &id[..8]);
        Ok(id)
    }

    /// Last device token recorded by the platform, if any.
    pub fn device_token(&self) -> Result<Option<String>> {
        self.store.get(DEVICE_TOKEN_KEY)
    }

    /// Record a freshly delivered device token. The registration id is untouched.
    pub fn set_device_token(&self, token: &str) -> Result<()> {
        self.store
            .set(DEVICE_TOKEN_KEY, token)
            .context("Failed to persist device token")
    }
}

/// Random v4 UUID rendered as 32 uppercase hex characters, no separators.
fn generate_registration_id() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}
