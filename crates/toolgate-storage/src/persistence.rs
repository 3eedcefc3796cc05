//! Token persistence (SPEC_FULL.md §4.B, §6).
//!
//! Keys are validated against `[A-Za-z0-9_:-]+` before touching any backend —
//! this is what the spec means by "platform-specific commands executed with
//! argument-array invocation to prevent injection": `keyring` already invokes
//! the OS APIs directly (no shell), but the key-shape check is kept as a
//! belt-and-braces boundary check on untrusted upstream ids. The colon is
//! allowed because `TokenStore` composes keys as `<serviceName>:<upstream_id>`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::crypto::FieldEncryptor;
use crate::keychain::MasterKeyProvider;

#[derive(Debug, Error)]
pub enum TokenPersistenceError {
    #[error("persistence key '{0}' contains characters outside [A-Za-z0-9_:-]")]
    InvalidKey(String),
    #[error("keychain error: {0}")]
    Keychain(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// The wire shape persisted to disk/keychain (SPEC_FULL.md §6): `{accessToken,
/// expiresAt (ISO-8601), tokenType, scope?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

pub fn validate_persistence_key(key: &str) -> Result<(), TokenPersistenceError> {
    if !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':')
    {
        Ok(())
    } else {
        Err(TokenPersistenceError::InvalidKey(key.to_string()))
    }
}

/// Capability for persisting/loading/deleting a token record, keyed by
/// `<serviceName>:<upstream_id>`.
pub trait TokenPersistence: Send + Sync {
    fn save(&self, key: &str, value: &PersistedToken) -> Result<(), TokenPersistenceError>;
    fn load(&self, key: &str) -> Result<Option<PersistedToken>, TokenPersistenceError>;
    fn delete(&self, key: &str) -> Result<(), TokenPersistenceError>;
}

/// OS-keychain-backed persistence. One `keyring::Entry` per key.
pub struct KeychainTokenPersistence {
    service_name: String,
}

impl KeychainTokenPersistence {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, TokenPersistenceError> {
        Entry::new(&self.service_name, key).map_err(|e| TokenPersistenceError::Keychain(e.to_string()))
    }
}

impl TokenPersistence for KeychainTokenPersistence {
    fn save(&self, key: &str, value: &PersistedToken) -> Result<(), TokenPersistenceError> {
        validate_persistence_key(key)?;
        let json = serde_json::to_string(value).map_err(|e| TokenPersistenceError::Serde(e.to_string()))?;
        self.entry(key)?
            .set_password(&json)
            .map_err(|e| TokenPersistenceError::Keychain(e.to_string()))
    }

    fn load(&self, key: &str) -> Result<Option<PersistedToken>, TokenPersistenceError> {
        validate_persistence_key(key)?;
        match self.entry(key)?.get_password() {
            Ok(json) => {
                let value = serde_json::from_str(&json).map_err(|e| TokenPersistenceError::Serde(e.to_string()))?;
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TokenPersistenceError::Keychain(e.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<(), TokenPersistenceError> {
        validate_persistence_key(key)?;
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(TokenPersistenceError::Keychain(e.to_string())),
        }
    }
}

/// Encrypted-file fallback for environments with no reachable OS keychain.
/// All keys live in a single JSON map file, each value AES-256-GCM encrypted.
/// Directory created at `0700`, file written at `0600` (SPEC_FULL.md §6).
pub struct EncryptedFileTokenPersistence {
    path: PathBuf,
    encryptor: FieldEncryptor,
    lock: Mutex<()>,
}

impl EncryptedFileTokenPersistence {
    pub fn new(dir: &Path, key_provider: &dyn MasterKeyProvider) -> Result<Self, TokenPersistenceError> {
        fs::create_dir_all(dir).map_err(|e| TokenPersistenceError::Io(e.to_string()))?;
        set_dir_permissions(dir);

        let master_key = key_provider
            .get_or_create_key()
            .map_err(|e| TokenPersistenceError::Keychain(e.to_string()))?;
        let encryptor = FieldEncryptor::new(&master_key).map_err(|e| TokenPersistenceError::Io(e.to_string()))?;

        Ok(Self {
            path: dir.join("tokens.enc.json"),
            encryptor,
            lock: Mutex::new(()),
        })
    }

    fn read_map(&self) -> Result<HashMap<String, String>, TokenPersistenceError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| TokenPersistenceError::Io(e.to_string()))?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| TokenPersistenceError::Serde(e.to_string()))
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), TokenPersistenceError> {
        let raw = serde_json::to_string(map).map_err(|e| TokenPersistenceError::Serde(e.to_string()))?;
        fs::write(&self.path, raw).map_err(|e| TokenPersistenceError::Io(e.to_string()))?;
        set_file_permissions(&self.path);
        Ok(())
    }
}

impl TokenPersistence for EncryptedFileTokenPersistence {
    fn save(&self, key: &str, value: &PersistedToken) -> Result<(), TokenPersistenceError> {
        validate_persistence_key(key)?;
        let _guard = self.lock.lock().unwrap();
        let mut map = self.read_map()?;
        let plaintext = serde_json::to_string(value).map_err(|e| TokenPersistenceError::Serde(e.to_string()))?;
        let ciphertext = self
            .encryptor
            .encrypt(&plaintext)
            .map_err(|e| TokenPersistenceError::Io(e.to_string()))?;
        map.insert(key.to_string(), ciphertext);
        self.write_map(&map)
    }

    fn load(&self, key: &str) -> Result<Option<PersistedToken>, TokenPersistenceError> {
        validate_persistence_key(key)?;
        let _guard = self.lock.lock().unwrap();
        let map = self.read_map()?;
        let Some(ciphertext) = map.get(key) else {
            return Ok(None);
        };
        let plaintext = self
            .encryptor
            .decrypt(ciphertext)
            .map_err(|e| TokenPersistenceError::Io(e.to_string()))?;
        let value = serde_json::from_str(&plaintext).map_err(|e| TokenPersistenceError::Serde(e.to_string()))?;
        Ok(Some(value))
    }

    fn delete(&self, key: &str) -> Result<(), TokenPersistenceError> {
        validate_persistence_key(key)?;
        let _guard = self.lock.lock().unwrap();
        let mut map = self.read_map()?;
        map.remove(key);
        self.write_map(&map)
    }
}

#[cfg(unix)]
fn set_dir_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(dir) {
        let mut perms = meta.permissions();
        perms.set_mode(0o700);
        let _ = fs::set_permissions(dir, perms);
    }
}

#[cfg(not(unix))]
fn set_dir_permissions(_dir: &Path) {}

#[cfg(unix)]
fn set_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) {}

/// Tries the OS keychain first; falls back to the encrypted file on any
/// keychain access error. This is the persistence the token store uses by
/// default when persistence is enabled (SPEC_FULL.md §4.B).
pub struct CompositeTokenPersistence {
    keychain: KeychainTokenPersistence,
    fallback: EncryptedFileTokenPersistence,
}

impl CompositeTokenPersistence {
    pub fn new(keychain: KeychainTokenPersistence, fallback: EncryptedFileTokenPersistence) -> Self {
        Self { keychain, fallback }
    }
}

impl TokenPersistence for CompositeTokenPersistence {
    fn save(&self, key: &str, value: &PersistedToken) -> Result<(), TokenPersistenceError> {
        match self.keychain.save(key, value) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("keychain save failed ({e}), falling back to encrypted file");
                self.fallback.save(key, value)
            }
        }
    }

    fn load(&self, key: &str) -> Result<Option<PersistedToken>, TokenPersistenceError> {
        match self.keychain.load(key) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("keychain load failed ({e}), falling back to encrypted file");
                self.fallback.load(key)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), TokenPersistenceError> {
        let keychain_result = self.keychain.delete(key);
        let fallback_result = self.fallback.delete(key);
        keychain_result.and(fallback_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_master_key;
    use zeroize::Zeroizing;

    struct FixedKeyProvider(pub [u8; crate::crypto::KEY_SIZE]);
    impl MasterKeyProvider for FixedKeyProvider {
        fn get_or_create_key(&self) -> anyhow::Result<Zeroizing<[u8; crate::crypto::KEY_SIZE]>> {
            Ok(Zeroizing::new(self.0))
        }
        fn key_exists(&self) -> bool {
            true
        }
        fn delete_key(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejects_keys_with_invalid_characters() {
        assert!(validate_persistence_key("svc upstream").is_err());
        assert!(validate_persistence_key("svc/upstream").is_err());
        assert!(validate_persistence_key("").is_err());
        assert!(validate_persistence_key("svc-upstream_1").is_ok());
    }

    #[test]
    fn accepts_the_colon_joined_service_and_upstream_key() {
        assert!(validate_persistence_key("toolgate:github").is_ok());
    }

    #[test]
    fn encrypted_file_round_trips_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FixedKeyProvider(generate_master_key().unwrap());
        let store = EncryptedFileTokenPersistence::new(dir.path(), &provider).unwrap();

        let token = PersistedToken {
            access_token: "abc123".to_string(),
            expires_at: Utc::now(),
            token_type: "Bearer".to_string(),
            scope: Some("openid".to_string()),
        };

        store.save("github", &token).unwrap();
        let loaded = store.load("github").unwrap().unwrap();
        assert_eq!(loaded.access_token, "abc123");

        store.delete("github").unwrap();
        assert!(store.load("github").unwrap().is_none());
    }

    #[test]
    fn encrypted_file_load_of_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FixedKeyProvider(generate_master_key().unwrap());
        let store = EncryptedFileTokenPersistence::new(dir.path(), &provider).unwrap();
        assert!(store.load("missing").unwrap().is_none());
    }
}
