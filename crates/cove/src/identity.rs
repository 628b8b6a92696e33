use std::fmt;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable per-installation client identifier. Generated once, persisted, and
/// used as the sender/recipient key in every signaling message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Persistence boundary for the client identifier: a single string under a
/// fixed key.
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, value: &str);
}

/// Load the persisted identity, regenerating it when the stored value is
/// missing, blank, or the literal `"0"` left behind by older installs.
pub fn ensure_identity(store: &dyn IdentityStore) -> ClientId {
    if let Some(value) = store.load() {
        let trimmed = value.trim();
        if !trimmed.is_empty() && trimmed != "0" {
            return ClientId(trimmed.to_string());
        }
    }
    let id = ClientId::generate();
    store.store(id.as_str());
    tracing::debug!(client_id = %id, "generated new client identity");
    id
}

/// File-backed store under the platform config directory.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new() -> Option<Self> {
        let dirs = directories::ProjectDirs::from("", "", "cove")?;
        Some(Self {
            path: dirs.config_dir().join("client-id"),
        })
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }

    fn store(&self, value: &str) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::warn!(error = %err, "failed to create identity directory");
                return;
            }
        }
        if let Err(err) = fs::write(&self.path, value) {
            tracing::warn!(error = %err, "failed to persist client identity");
        }
    }
}

/// In-memory store for tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryIdentityStore {
    value: parking_lot::Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preset(value: &str) -> Self {
        Self {
            value: parking_lot::Mutex::new(Some(value.to_string())),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Option<String> {
        self.value.lock().clone()
    }

    fn store(&self, value: &str) {
        *self.value.lock() = Some(value.to_string());
    }
}
