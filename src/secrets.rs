//! Encryption of configuration content at rest.
//!
//! Tokens have the shape `v1.<key_id>.<base64(nonce || ciphertext || tag)>`.
//! The key id is a fingerprint of the sealing key so a token produced under a
//! rotated-out key is reported as [`SecretError::KeyMismatch`] instead of a
//! generic decryption failure.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use thiserror::Error;

const TOKEN_VERSION: &str = "v1";
const KEY_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Token was encrypted under key {token_key}, active key is {active_key}")]
    KeyMismatch {
        token_key: String,
        active_key: String,
    },

    #[error("Malformed ciphertext token")]
    Malformed,

    #[error("Failed to decrypt data - ciphertext corrupted or key changed")]
    DecryptFailed,

    #[error("Failed to encrypt data")]
    EncryptFailed,
}

/// Encrypts and decrypts configuration bodies
pub trait SecretStore: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError>;

    fn decrypt(&self, token: &str) -> Result<String, SecretError>;

    /// Fingerprint of the active key
    fn key_id(&self) -> &str;
}

/// AES-256-GCM secret store with a single active key
pub struct AeadSecretStore {
    key: LessSafeKey,
    key_id: String,
    rng: SystemRandom,
}

impl std::fmt::Debug for AeadSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadSecretStore")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl AeadSecretStore {
    pub fn new(key_bytes: &[u8]) -> Result<Self, SecretError> {
        if key_bytes.len() != KEY_LEN {
            return Err(SecretError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                key_bytes.len()
            )));
        }

        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| SecretError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
        let fingerprint = format!("{:x}", Sha256::digest(key_bytes));

        Ok(Self {
            key: LessSafeKey::new(unbound),
            key_id: fingerprint[..12].to_string(),
            rng: SystemRandom::new(),
        })
    }

    /// Build a store from a base64 encoded key, as found in configuration
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let key_bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SecretError::InvalidKey(format!("not valid base64: {}", e)))?;
        Self::new(&key_bytes)
    }

    /// Generate a fresh random key, base64 encoded
    pub fn generate_key() -> Result<String, SecretError> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| SecretError::InvalidKey("system RNG unavailable".to_string()))?;
        Ok(STANDARD.encode(key))
    }
}

impl SecretStore for AeadSecretStore {
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SecretError::EncryptFailed)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(self.key_id.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| SecretError::EncryptFailed)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + in_out.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&in_out);

        Ok(format!(
            "{}.{}.{}",
            TOKEN_VERSION,
            self.key_id,
            STANDARD.encode(payload)
        ))
    }

    fn decrypt(&self, token: &str) -> Result<String, SecretError> {
        let mut parts = token.splitn(3, '.');
        let (Some(version), Some(token_key), Some(body)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SecretError::Malformed);
        };

        if version != TOKEN_VERSION {
            return Err(SecretError::Malformed);
        }

        if token_key != self.key_id {
            return Err(SecretError::KeyMismatch {
                token_key: token_key.to_string(),
                active_key: self.key_id.clone(),
            });
        }

        let payload = STANDARD.decode(body).map_err(|_| SecretError::Malformed)?;
        if payload.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(SecretError::Malformed);
        }

        let (nonce_bytes, sealed) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| SecretError::Malformed)?;
        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(self.key_id.as_bytes()), &mut in_out)
            .map_err(|_| SecretError::DecryptFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| SecretError::Malformed)
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}
