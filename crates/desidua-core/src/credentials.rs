use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::errors::DesiduaError;

/// Storage key written by the login flow and read by every authorized request.
pub const AUTH_TOKEN_KEY: &str = "authToken";

/// Persistent string key-value storage.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), DesiduaError>;
    fn remove(&self, key: &str) -> Result<(), DesiduaError>;
}

/// Source of the bearer credential for authorized requests.
pub trait CredentialProvider: Send + Sync {
    /// The current bearer token, or `None` when unauthenticated.
    fn current(&self) -> Option<String>;
}

/// Reads the bearer token from a [`CredentialStore`] on every call.
#[derive(Clone)]
pub struct StoredCredential {
    store: Arc<dyn CredentialStore>,
}

impl StoredCredential {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

impl CredentialProvider for StoredCredential {
    fn current(&self) -> Option<String> {
        self.store
            .get(AUTH_TOKEN_KEY)
            .filter(|token| !token.trim().is_empty())
    }
}

/// JSON-file backed key-value store (`storage.json` in the data directory).
///
/// Entries are cached in memory and the whole map is rewritten on each change.
pub struct LocalStorage {
    entries: Mutex<BTreeMap<String, String>>,
    file_path: PathBuf,
}

impl LocalStorage {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("storage.json");
        let entries = Self::load(&file_path);
        Self {
            entries: Mutex::new(entries),
            file_path,
        }
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("discarding unreadable {}: {e}", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), DesiduaError> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DesiduaError::Storage(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| DesiduaError::Storage(e.to_string()))?;
        std::fs::write(&self.file_path, json).map_err(|e| DesiduaError::Storage(e.to_string()))
    }
}

impl CredentialStore for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DesiduaError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), DesiduaError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// OS secure storage (Keychain / libsecret / Credential Manager).
#[cfg(not(any(target_os = "android", target_os = "ios")))]
pub struct KeyringStore {
    service: String,
}

#[cfg(not(any(target_os = "android", target_os = "ios")))]
impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, DesiduaError> {
        keyring::Entry::new(&self.service, key).map_err(|e| DesiduaError::Storage(e.to_string()))
    }
}

#[cfg(not(any(target_os = "android", target_os = "ios")))]
impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.entry(key).ok()?.get_password() {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                tracing::warn!("keyring read failed for {key}: {e}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DesiduaError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| DesiduaError::Storage(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), DesiduaError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(DesiduaError::Storage(e.to_string())),
        }
    }
}

/// In-memory store, handy for hosts that manage persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DesiduaError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DesiduaError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn local_storage_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        {
            let store = LocalStorage::new(path);
            store.set(AUTH_TOKEN_KEY, "jwt-1").unwrap();
        }
        let store = LocalStorage::new(path);
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("jwt-1"));
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path().to_str().unwrap());
        store.remove(AUTH_TOKEN_KEY).unwrap();
        assert!(!dir.path().join("storage.json").exists());
    }

    #[test]
    fn corrupt_storage_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("storage.json"), "{{{").unwrap();
        let store = LocalStorage::new(dir.path().to_str().unwrap());
        assert!(store.get(AUTH_TOKEN_KEY).is_none());
    }

    #[test]
    fn provider_reads_latest_value() {
        let store = Arc::new(MemoryStore::default());
        let provider = StoredCredential::new(store.clone());
        assert!(provider.current().is_none());

        store.set(AUTH_TOKEN_KEY, "first").unwrap();
        assert_eq!(provider.current().as_deref(), Some("first"));

        store.set(AUTH_TOKEN_KEY, "second").unwrap();
        assert_eq!(provider.current().as_deref(), Some("second"));

        store.remove(AUTH_TOKEN_KEY).unwrap();
        assert!(provider.current().is_none());
    }

    #[test]
    fn blank_token_counts_as_absent() {
        let store = Arc::new(MemoryStore::default());
        store.set(AUTH_TOKEN_KEY, "  ").unwrap();
        assert!(StoredCredential::new(store).current().is_none());
    }
}
