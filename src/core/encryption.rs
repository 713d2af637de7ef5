//! AES-256-GCM keyring for local key-usage
//!
//! Stands in for a managed key service:
//! - One random 256-bit key per key reference, created on first use
//! - Format: [nonce: 12 bytes][ciphertext][tag: 16 bytes]
//! - Authenticated encryption, so a ciphertext decrypts only under its own key

use crate::error::{GateError, Result};
use crate::external::KeyService;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;

/// Encryption key (32 bytes for AES-256)
pub type EncryptionKey = [u8; 32];

/// Nonce size for AES-GCM (96 bits / 12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits / 16 bytes)
pub const TAG_SIZE: usize = 16;

/// Overhead added by encryption (nonce + tag)
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// In-process keyring keyed by key reference
#[derive(Default)]
pub struct LocalKeyring {
    keys: RwLock<HashMap<String, EncryptionKey>>,
}

impl LocalKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a random encryption key
    pub fn generate_key() -> EncryptionKey {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Register an existing key under `key_ref`
    pub fn insert(&self, key_ref: impl Into<String>, key: EncryptionKey) {
        self.keys.write().insert(key_ref.into(), key);
    }

    pub fn contains(&self, key_ref: &str) -> bool {
        self.keys.read().contains_key(key_ref)
    }

    fn key_for_encrypt(&self, key_ref: &str) -> EncryptionKey {
        if let Some(key) = self.keys.read().get(key_ref) {
            return *key;
        }
        *self
            .keys
            .write()
            .entry(key_ref.to_string())
            .or_insert_with(Self::generate_key)
    }

    fn key_for_decrypt(&self, key_ref: &str) -> Result<EncryptionKey> {
        self.keys
            .read()
            .get(key_ref)
            .copied()
            .ok_or_else(|| GateError::Encryption(format!("unknown key '{}'", key_ref)))
    }
}

impl KeyService for LocalKeyring {
    fn encrypt(&self, plaintext: &[u8], key_ref: &str) -> Result<Vec<u8>> {
        encrypt(plaintext, &self.key_for_encrypt(key_ref))
    }

    fn decrypt(&self, ciphertext: &[u8], key_ref: &str) -> Result<Vec<u8>> {
        decrypt(ciphertext, &self.key_for_decrypt(key_ref)?)
    }
}

/// Encrypt data using AES-256-GCM
///
/// Returns encrypted data with format: [nonce][ciphertext][tag]
pub fn encrypt(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| GateError::Encryption(format!("encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data using AES-256-GCM
///
/// Expects data in format: [nonce][ciphertext][tag]
pub fn decrypt(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if data.len() < ENCRYPTION_OVERHEAD {
        return Err(GateError::Encryption("ciphertext too short".to_string()));
    }

    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

    cipher
        .decrypt(nonce, &data[NONCE_SIZE..])
        .map_err(|e| GateError::Encryption(format!("decryption failed: {}", e)))
}
