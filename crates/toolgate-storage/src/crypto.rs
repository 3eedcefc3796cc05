//! Field-level encryption for the encrypted-file persistence fallback.
//!
//! Uses AES-256-GCM for authenticated encryption, the same construction
//! `mcpmux-storage::crypto` uses for its SQLite-backed credential fields.

use anyhow::{Context, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

/// Size of the encryption key (32 bytes = 256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce (12 bytes for AES-GCM).
const NONCE_SIZE: usize = 12;

/// Encryptor for sensitive field data.
pub struct FieldEncryptor {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl FieldEncryptor {
    /// Create a new encryptor with the given master key (must be 32 bytes).
    pub fn new(master_key: &[u8; KEY_SIZE]) -> Result<Self> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, master_key)
            .map_err(|_| anyhow::anyhow!("failed to create encryption key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound_key),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypts a plaintext string. Returns hex(nonce || ciphertext || tag).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("failed to generate nonce"))?;

        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("encryption failed"))?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&in_out);
        Ok(hex::encode(result))
    }

    /// Decrypts a hex(nonce || ciphertext || tag) string.
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let ciphertext = hex::decode(ciphertext_hex).context("invalid hex encoding")?;
        if ciphertext.len() < NONCE_SIZE + AES_256_GCM.tag_len() {
            anyhow::bail!("ciphertext too short");
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
        let nonce_array: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_array);

        let mut in_out = encrypted.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("decryption failed - wrong key or corrupted data"))?;

        String::from_utf8(plaintext.to_vec()).context("decrypted data is not valid UTF-8")
    }
}

/// Generates a random master key.
pub fn generate_master_key() -> Result<[u8; KEY_SIZE]> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_SIZE];
    rng.fill(&mut key)
        .map_err(|_| anyhow::anyhow!("failed to generate random key"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = generate_master_key().unwrap();
        let encryptor = FieldEncryptor::new(&key).unwrap();

        let plaintext = "my-secret-token-12345";
        let ciphertext = encryptor.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(encryptor.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let encryptor1 = FieldEncryptor::new(&generate_master_key().unwrap()).unwrap();
        let encryptor2 = FieldEncryptor::new(&generate_master_key().unwrap()).unwrap();

        let ciphertext = encryptor1.encrypt("secret").unwrap();
        assert!(encryptor2.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn nonce_is_randomized_per_call() {
        let encryptor = FieldEncryptor::new(&generate_master_key().unwrap()).unwrap();
        let a = encryptor.encrypt("same-data").unwrap();
        let b = encryptor.encrypt("same-data").unwrap();
        assert_ne!(a, b);
        assert_eq!(encryptor.decrypt(&a).unwrap(), "same-data");
        assert_eq!(encryptor.decrypt(&b).unwrap(), "same-data");
    }
}
