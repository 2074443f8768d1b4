//! Credential vault for Redis connection secrets.
//!
//! Secrets are sealed with AES-256-GCM under a single process-wide key and
//! stored as `v1:{fingerprint}:{base64(nonce || ciphertext || tag)}`. The
//! fingerprint is the first eight hex digits of the key's SHA-256 digest; it
//! is bound into the AEAD as associated data, so ciphertext sealed under a
//! rotated key is reported as [`VaultError::KeyMismatch`] instead of a bare
//! authentication failure.
//!
//! The vault is the only component that ever sees plaintext. Callers keep the
//! sealed string and hand it back here when they need to build a connection.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Length in bytes of a vault key.
pub const KEY_LEN: usize = 32;

const FORMAT_VERSION: &str = "v1";

/// Errors raised while sealing or opening secrets.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid vault key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("malformed ciphertext: {0}")]
    Decode(String),

    #[error("decryption failed: ciphertext was tampered with or sealed under another key")]
    Decrypt,

    #[error("ciphertext sealed under key {found}, vault key is {expected}")]
    KeyMismatch { expected: String, found: String },
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Encrypts and decrypts connection secrets under one key.
pub struct CredentialVault {
    key: LessSafeKey,
    fingerprint: String,
    rng: SystemRandom,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from raw key bytes. The key must be exactly 32 bytes.
    pub fn new(key: &[u8]) -> VaultResult<Self> {
        if key.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| VaultError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
        let fingerprint = fingerprint(key);
        debug!(%fingerprint, "credential vault initialized");
        Ok(Self {
            key: LessSafeKey::new(unbound),
            fingerprint,
            rng: SystemRandom::new(),
        })
    }

    /// Build a vault from a base64-encoded key, as stored in configuration.
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Self::new(&bytes)
    }

    /// Generate a fresh random key, base64-encoded.
    pub fn generate_key() -> VaultResult<String> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| VaultError::InvalidKey("system randomness unavailable".to_string()))?;
        Ok(BASE64.encode(key))
    }

    /// Short identifier of the vault key, safe to log.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Seal a plaintext secret. Each call uses a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultError::Encrypt)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(self.fingerprint.as_bytes()),
                &mut in_out,
            )
            .map_err(|_| VaultError::Encrypt)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + in_out.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&in_out);

        Ok(format!(
            "{FORMAT_VERSION}:{}:{}",
            self.fingerprint,
            BASE64.encode(payload)
        ))
    }

    /// Open a sealed secret. `None` and empty input decrypt to `None`.
    pub fn decrypt(&self, ciphertext: Option<&str>) -> VaultResult<Option<String>> {
        let sealed = match ciphertext {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(None),
        };

        let mut parts = sealed.splitn(3, ':');
        let (Some(version), Some(found), Some(body)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(VaultError::Decode("expected version:fingerprint:payload".to_string()));
        };
        if version != FORMAT_VERSION {
            return Err(VaultError::Decode(format!("unsupported format version {version:?}")));
        }
        if found != self.fingerprint {
            return Err(VaultError::KeyMismatch {
                expected: self.fingerprint.clone(),
                found: found.to_string(),
            });
        }

        let mut payload = BASE64
            .decode(body)
            .map_err(|e| VaultError::Decode(e.to_string()))?;
        if payload.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(VaultError::Decode("payload too short".to_string()));
        }

        let (nonce_bytes, sealed_bytes) = payload.split_at_mut(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| VaultError::Decrypt)?;
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(self.fingerprint.as_bytes()), sealed_bytes)
            .map_err(|_| VaultError::Decrypt)?;

        String::from_utf8(plaintext.to_vec())
            .map(Some)
            .map_err(|_| VaultError::Decode("plaintext is not UTF-8".to_string()))
    }
}

fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(digest)[..8].to_string()
}
