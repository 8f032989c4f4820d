//! Encryption-at-rest for embedding vectors.
//!
//! AES-256-GCM with the AAD bound to the record's immutable identity, so a
//! ciphertext cannot be swapped between records without failing
//! authentication. Framing: `nonce(12) || ciphertext_with_tag`.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use reunite_core::types::{CaseId, Hash256};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::IndexError;

/// 32-byte AES-256 key.
pub type EncryptionKey = [u8; 32];

/// AES-GCM nonce size.
pub const NONCE_SIZE: usize = 12;

/// Domain prefix for the at-rest AAD.
const DOMAIN_VECTOR_ATREST_AAD: &[u8] = b"REUNITE_VECTOR_ATREST_AAD_V1";

/// Resolves `encryption_key_ref` values to key material.
///
/// Production deployments back this with the external key-management
/// collaborator; key bytes never appear in persisted records.
pub trait KeyManager: Send + Sync {
    fn resolve(&self, key_ref: &str) -> Result<EncryptionKey, IndexError>;
}

/// Key manager over a fixed in-memory key table.
pub struct StaticKeyManager {
    keys: RwLock<HashMap<String, EncryptionKey>>,
}

impl StaticKeyManager {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Single-key manager under the given reference name.
    pub fn with_key(key_ref: impl Into<String>, key: EncryptionKey) -> Self {
        let manager = Self::new();
        manager.insert(key_ref, key);
        manager
    }

    pub fn insert(&self, key_ref: impl Into<String>, key: EncryptionKey) {
        self.keys
            .write()
            .expect("key table lock poisoned")
            .insert(key_ref.into(), key);
    }
}

impl Default for StaticKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyManager for StaticKeyManager {
    fn resolve(&self, key_ref: &str) -> Result<EncryptionKey, IndexError> {
        self.keys
            .read()
            .expect("key table lock poisoned")
            .get(key_ref)
            .copied()
            .ok_or_else(|| IndexError::UnknownKeyRef(key_ref.to_string()))
    }
}

/// Generate a fresh random key.
pub fn generate_key() -> EncryptionKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// AAD binding a ciphertext to the record it belongs to.
pub fn record_aad(record_id: &Uuid, case_id: &CaseId, model_version: &str) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_VECTOR_ATREST_AAD);
    hasher.update(record_id.as_bytes());
    hasher.update((case_id.as_str().len() as u32).to_be_bytes());
    hasher.update(case_id.as_str().as_bytes());
    hasher.update((model_version.len() as u32).to_be_bytes());
    hasher.update(model_version.as_bytes());
    hasher.finalize().into()
}

/// Serialize a vector to little-endian f32 bytes.
fn vector_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Encrypt a vector for storage at rest.
pub fn encrypt_vector(
    key: &EncryptionKey,
    aad: &Hash256,
    vector: &[f32],
) -> Result<Vec<u8>, IndexError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| IndexError::EncryptFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: &vector_bytes(vector),
                aad,
            },
        )
        .map_err(|e| IndexError::EncryptFailed(e.to_string()))?;

    let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(&ciphertext);
    Ok(framed)
}

/// Decrypt an at-rest vector. The returned plaintext is transient; callers
/// must not hold it beyond the scope of the current computation.
pub fn decrypt_vector(
    key: &EncryptionKey,
    aad: &Hash256,
    record_id: &Uuid,
    framed: &[u8],
) -> Result<Vec<f32>, IndexError> {
    if framed.len() < NONCE_SIZE {
        return Err(IndexError::DecryptFailed(*record_id));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| IndexError::DecryptFailed(*record_id))?;
    let nonce = Nonce::from_slice(&framed[..NONCE_SIZE]);

    let plaintext = cipher
        .decrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: &framed[NONCE_SIZE..],
                aad,
            },
        )
        .map_err(|_| IndexError::DecryptFailed(*record_id))?;

    bytes_vector(&plaintext).ok_or(IndexError::DecryptFailed(*record_id))
}
