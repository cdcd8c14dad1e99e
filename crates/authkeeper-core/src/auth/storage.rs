//! Persistence of credential fields.
//!
//! Backends are plain string key/value stores, like a browser storage area.
//! The token bundle is spread over three keys (`access_token`,
//! `refresh_token`, `expires_at`) with `expires_at` string-encoded.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credentials::KeyringStorage;
use super::sealed::Sealer;
use super::session::TokenBundle;
use crate::config::{Config, StorageBackend};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const EXPIRES_AT_KEY: &str = "expires_at";

/// Every key the session store writes
pub const CREDENTIAL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY];

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Passphrase for sealing the session file
pub const ENV_PASSPHRASE: &str = "AUTHKEEPER_PASSPHRASE";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Corrupt persisted state: {0}")]
    Corrupt(String),
}

/// String key/value store for credential fields.
pub trait CredentialStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Write several keys; backends with a single backing file override this
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Erase everything this store holds
    fn clear(&self) -> Result<(), StorageError>;
}

/// Read the persisted bundle. Any missing or empty key means "no credential".
pub fn load_bundle(storage: &dyn CredentialStorage) -> Result<Option<TokenBundle>, StorageError> {
    let read = |key: &str| -> Result<Option<String>, StorageError> {
        Ok(storage.get(key)?.filter(|v| !v.is_empty()))
    };

    let (Some(access_token), Some(refresh_token), Some(expires_at)) = (
        read(ACCESS_TOKEN_KEY)?,
        read(REFRESH_TOKEN_KEY)?,
        read(EXPIRES_AT_KEY)?,
    ) else {
        return Ok(None);
    };

    let expires_at = expires_at
        .trim()
        .parse::<i64>()
        .map_err(|_| {
            StorageError::Corrupt(format!("expires_at is not epoch seconds: {:?}", expires_at))
        })?;

    Ok(Some(TokenBundle {
        access_token,
        refresh_token,
        expires_at,
    }))
}

pub fn save_bundle(
    storage: &dyn CredentialStorage,
    bundle: &TokenBundle,
) -> Result<(), StorageError> {
    let expires_at = bundle.expires_at.to_string();
    storage.set_all(&[
        (ACCESS_TOKEN_KEY, &bundle.access_token),
        (REFRESH_TOKEN_KEY, &bundle.refresh_token),
        (EXPIRES_AT_KEY, &expires_at),
    ])
}

/// Open the backend selected by configuration
pub fn open_storage(config: &Config) -> Result<Arc<dyn CredentialStorage>> {
    match config.storage {
        StorageBackend::Memory => {
            debug!("Using in-memory credential storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageBackend::File => {
            let path = config.cache_dir()?.join(SESSION_FILE);
            let storage = match std::env::var(ENV_PASSPHRASE).ok().filter(|p| !p.is_empty()) {
                Some(passphrase) => FileStorage::sealed(&path, &passphrase)
                    .context("Failed to open sealed session file")?,
                None => {
                    warn!(
                        path = %path.display(),
                        "Session file is not sealed; set {} to encrypt it",
                        ENV_PASSPHRASE
                    );
                    FileStorage::new(&path)
                }
            };
            info!(path = %path.display(), "Using file credential storage");
            Ok(Arc::new(storage))
        }
        StorageBackend::Keyring => {
            info!("Using keyring credential storage");
            Ok(Arc::new(KeyringStorage::new()))
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Volatile storage that lives as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

/// JSON key/value file, optionally sealed with a passphrase.
pub struct FileStorage {
    path: PathBuf,
    sealer: Option<Sealer>,
    // Serializes read-modify-write of the file within this process
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sealer: None,
            lock: Mutex::new(()),
        }
    }

    /// File storage encrypted under `passphrase`. An existing file keeps its salt;
    /// one without a readable header gets a fresh salt and reads back as corrupt.
    pub fn sealed(path: impl AsRef<Path>, passphrase: &str) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let sealer = if path.exists() {
            let blob = std::fs::read(&path)?;
            match Sealer::for_blob(passphrase, &blob) {
                Ok(sealer) => sealer,
                Err(StorageError::Corrupt(reason)) => {
                    warn!(
                        path = %path.display(),
                        reason = %reason,
                        "Session file has no usable header"
                    );
                    Sealer::new(passphrase)?
                }
                Err(e) => return Err(e),
            }
        } else {
            Sealer::new(passphrase)?
        };
        Ok(Self {
            path,
            sealer: Some(sealer),
            lock: Mutex::new(()),
        })
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&self.path)?;
        let plaintext = match self.sealer {
            Some(ref sealer) => sealer.open(&bytes)?,
            None => bytes,
        };
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let plaintext = serde_json::to_vec_pretty(map)?;
        let bytes = match self.sealer {
            Some(ref sealer) => sealer.seal(&plaintext)?,
            None => plaintext,
        };
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl CredentialStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_all(&[(key, value)])
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_map()?;
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        self.write_map(&map)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "Removed session file");
        }
        Ok(())
    }
}
