use std::collections::HashMap;
use std::sync::Mutex;

use keyring::Entry;
use tracing::debug;

use super::storage::{CredentialStorage, StorageError, CREDENTIAL_KEYS};

const SERVICE_NAME: &str = "authkeeper";

/// Credential fields kept in the OS keychain, one entry per key.
pub struct KeyringStorage {
    service: String,
    // Entries are reused so a store keeps talking to the same credential
    entries: Mutex<HashMap<String, Entry>>,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn with_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Entry) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if !entries.contains_key(key) {
            let entry = Entry::new(&self.service, key)?;
            entries.insert(key.to_string(), entry);
        }
        match entries.get(key) {
            Some(entry) => f(entry),
            None => Err(StorageError::Corrupt(format!("keyring entry {} vanished", key))),
        }
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_entry(key, |entry| Ok(entry.set_password(value)?))
    }

    fn clear(&self) -> Result<(), StorageError> {
        for key in CREDENTIAL_KEYS {
            self.with_entry(key, |entry| match entry.delete_credential() {
                Ok(()) => Ok(()),
                Err(keyring::Error::NoEntry) => {
                    debug!(key, "No keyring entry to clear");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            })?;
        }
        Ok(())
    }
}
