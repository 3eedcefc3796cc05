//! OS keychain integration for the encrypted-file fallback's master key.
//!
//! Mirrors `mcpmux-storage::keychain::KeychainKeyProvider`, narrowed to the
//! single master-encryption-key entry this workspace needs (the teacher also
//! stores a JWT signing secret here for its inbound auth surface, which is
//! out of scope per SPEC_FULL.md §1).

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{generate_master_key, KEY_SIZE};

const MASTER_KEY_NAME: &str = "master-encryption-key";

/// Provides the master key used to encrypt the file-fallback persistence
/// store. Abstracted so tests can swap in a fixed key without touching the
/// real OS keychain.
pub trait MasterKeyProvider: Send + Sync {
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>>;
    fn key_exists(&self) -> bool;
    fn delete_key(&self) -> Result<()>;
}

/// OS-keychain-backed master key provider (Windows Credential Manager, macOS
/// Keychain, Linux Secret Service).
pub struct KeychainKeyProvider {
    entry: Entry,
}

impl KeychainKeyProvider {
    pub fn new(service_name: &str) -> Result<Self> {
        let entry =
            Entry::new(service_name, MASTER_KEY_NAME).context("failed to create keychain entry")?;
        Ok(Self { entry })
    }

    #[cfg(test)]
    pub fn with_names(service: &str, key_name: &str) -> Result<Self> {
        let entry = Entry::new(service, key_name).context("failed to create keychain entry")?;
        Ok(Self { entry })
    }
}

impl MasterKeyProvider for KeychainKeyProvider {
    fn get_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        match self.entry.get_password() {
            Ok(hex_key) => {
                debug!("retrieved existing master key from keychain");
                let key_bytes = hex::decode(&hex_key).context("invalid key format in keychain")?;
                if key_bytes.len() != KEY_SIZE {
                    anyhow::bail!(
                        "invalid key size in keychain: expected {}, got {}",
                        KEY_SIZE,
                        key_bytes.len()
                    );
                }
                let mut key = Zeroizing::new([0u8; KEY_SIZE]);
                key.copy_from_slice(&key_bytes);
                Ok(key)
            }
            Err(keyring::Error::NoEntry) => {
                info!("no master key found in keychain, generating one");
                let key = generate_master_key()?;
                self.entry
                    .set_password(&hex::encode(key))
                    .context("failed to store master key in keychain")?;
                Ok(Zeroizing::new(key))
            }
            Err(e) => {
                warn!("keychain error: {:?}", e);
                Err(anyhow::anyhow!("failed to access keychain: {e}"))
            }
        }
    }

    fn key_exists(&self) -> bool {
        self.entry.get_password().is_ok()
    }

    fn delete_key(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("failed to delete key from keychain: {e}")),
        }
    }
}
