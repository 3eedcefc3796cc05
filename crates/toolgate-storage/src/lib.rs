//! Optional persistence for the outbound token store (SPEC_FULL.md §4.B, §6).
//!
//! A token store is fully functional in-memory; persistence is opt-in. When
//! enabled, it is backed by the OS keychain (`keyring`) with an AES-256-GCM
//! encrypted-file fallback (`ring`) for environments with no reachable
//! keychain. Grounded on `mcpmux-storage`'s `crypto.rs` (`FieldEncryptor`) and
//! `keychain.rs` (`KeychainKeyProvider`), generalized from "database master
//! key" to "token persistence" since this workspace has no SQLite layer.

pub mod crypto;
pub mod keychain;
pub mod persistence;

pub use crypto::{generate_master_key, FieldEncryptor, KEY_SIZE};
pub use keychain::{KeychainKeyProvider, MasterKeyProvider};
pub use persistence::{
    validate_persistence_key, CompositeTokenPersistence, EncryptedFileTokenPersistence,
    KeychainTokenPersistence, PersistedToken, TokenPersistence, TokenPersistenceError,
};

/// Default directory name under the OS data-local dir for the encrypted-file
/// fallback (SPEC_FULL.md §6: "... under the user's home area").
pub const DATA_DIR_NAME: &str = "toolgate";
