use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

const STORE_SCHEMA_VERSION: u32 = 1;

/// Client-side keys that survive a page reload.
///
/// Every key except the bearer token is write-once, read-once-then-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    BearerToken,
    ReturnLocale,
    PendingLinkParam,
    NeedsSecondRefresh,
}

impl StorageKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BearerToken => "chatdesk.auth.bearer_token.v1",
            Self::ReturnLocale => "chatdesk.auth.return_locale.v1",
            Self::PendingLinkParam => "chatdesk.auth.pending_link_param.v1",
            Self::NeedsSecondRefresh => "chatdesk.nav.needs_second_refresh.v1",
        }
    }

    #[must_use]
    pub fn from_storage_name(name: &str) -> Option<Self> {
        [
            Self::BearerToken,
            Self::ReturnLocale,
            Self::PendingLinkParam,
            Self::NeedsSecondRefresh,
        ]
        .into_iter()
        .find(|key| key.as_str() == name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("client store lock poisoned")]
    Poisoned,
    #[error("client store io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("client store encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait ClientStore: Send + Sync {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError>;
    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: StorageKey) -> Result<(), StorageError>;

    /// Reads a key and deletes it in the same step.
    fn take(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let value = self.get(key)?;
        if value.is_some() {
            self.remove(key)?;
        }
        Ok(value)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<StorageKey, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (StorageKey, String)>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }
}

impl ClientStore for MemoryStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(&key).cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(&key);
        Ok(())
    }

    fn take(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.remove(&key))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// JSON file backed store for hosts without browser storage.
///
/// Unknown or corrupt files load as empty; every mutation rewrites the file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StoreDocument>(&raw) {
                Ok(document) if document.version == STORE_SCHEMA_VERSION => document.entries,
                Ok(document) => {
                    tracing::warn!(
                        target: "chatdesk.client",
                        path = %path.display(),
                        version = document.version,
                        "ignoring client store with unknown schema version",
                    );
                    BTreeMap::new()
                }
                Err(error) => {
                    tracing::warn!(
                        target: "chatdesk.client",
                        path = %path.display(),
                        error = %error,
                        "failed to parse client store; starting empty",
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let encoded = serde_json::to_string_pretty(&StoreDocument {
            version: STORE_SCHEMA_VERSION,
            entries: entries.clone(),
        })?;
        fs::write(&self.path, encoded).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl ClientStore for JsonFileStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key.as_str()).cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        let mut next = entries.clone();
        next.insert(key.as_str().to_string(), value.to_string());
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        self.take(key).map(|_| ())
    }

    /// Memory only changes once the file write succeeded, so a consumed key
    /// cannot come back on the next `open`.
    fn take(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        if !entries.contains_key(key.as_str()) {
            return Ok(None);
        }
        let mut next = entries.clone();
        let value = next.remove(key.as_str());
        self.flush(&next)?;
        *entries = next;
        Ok(value)
    }
}
