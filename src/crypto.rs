//! Cryptography for stored credentials.
//!
//! Agent auth tokens are encrypted at rest with AES-256-GCM and stored as
//! `enc:v1:BASE64(nonce||ciphertext)`. The key comes from the `TOKEN_KEY`
//! environment variable (hex or base64) or is generated once and persisted
//! under the data directory.
//!
//! User passwords are hashed with PBKDF2-HMAC-SHA256 and a per-user salt;
//! session tokens are 256-bit random values.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;
use std::path::Path;
use thiserror::Error;

/// Key length in bytes (256 bits for AES-256)
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

/// Environment variable holding the token encryption key
pub const TOKEN_KEY_ENV: &str = "TOKEN_KEY";

/// Storage prefix for encrypted values
const ENCRYPTED_PREFIX: &str = "enc:v1:";

/// PBKDF2 iteration count for password hashing
#[cfg(not(test))]
const PBKDF2_ROUNDS: u32 = 600_000;
/// Reduced iteration count so the test suite stays fast
#[cfg(test)]
const PBKDF2_ROUNDS: u32 = 1_000;

const SALT_LENGTH: usize = 16;
const SESSION_TOKEN_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: invalid key or corrupted data")]
    Decrypt,

    #[error("malformed encrypted value")]
    Malformed,
}

/// AES-256-GCM cipher bound to one key, shared by the agent store.
#[derive(Clone)]
pub struct SecretBox {
    key: [u8; KEY_LENGTH],
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Check whether a stored value carries the encryption wrapper.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    /// Encrypt a plaintext token. Already-encrypted values pass through
    /// unchanged so updates can round-trip stored records.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if Self::is_encrypted(plaintext) {
            return Ok(plaintext.to_string());
        }

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(&combined)))
    }

    /// Decrypt a stored token.
    pub fn decrypt(&self, value: &str) -> Result<String, CryptoError> {
        let payload = value
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or(CryptoError::Malformed)?;

        let combined = BASE64.decode(payload).map_err(|_| CryptoError::Malformed)?;
        if combined.len() < NONCE_LENGTH {
            return Err(CryptoError::Malformed);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

/// Generate a new random encryption key.
pub fn generate_key() -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Parse a key from hex or base64 format.
fn parse_key(key_str: &str) -> Result<[u8; KEY_LENGTH], CryptoError> {
    let trimmed = key_str.trim();

    // Hex first (64 characters = 32 bytes)
    if trimmed.len() == KEY_LENGTH * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(trimmed).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let bytes = BASE64
        .decode(trimmed)
        .map_err(|_| CryptoError::InvalidKey("neither valid hex nor base64".to_string()))?;

    if bytes.len() != KEY_LENGTH {
        return Err(CryptoError::InvalidKey(format!(
            "key must be {} bytes, got {}",
            KEY_LENGTH,
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Load the token key from the environment or `<data_dir>/token.key`,
/// generating and persisting a fresh one on first start.
pub fn load_or_create_key(data_dir: &Path) -> anyhow::Result<[u8; KEY_LENGTH]> {
    if let Ok(value) = std::env::var(TOKEN_KEY_ENV) {
        if !value.trim().is_empty() {
            return Ok(parse_key(&value)?);
        }
    }

    let key_path = data_dir.join("token.key");
    if key_path.exists() {
        let contents = std::fs::read_to_string(&key_path)?;
        return Ok(parse_key(&contents)?);
    }

    let key = generate_key();
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&key_path, hex::encode(key))?;
    tracing::info!(path = %key_path.display(), "Generated new token encryption key");

    Ok(key)
}

/// Generate a random salt for password hashing.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    BASE64.encode(salt)
}

/// Hash a password with PBKDF2-HMAC-SHA256 and the given salt.
pub fn hash_password(password: &str, salt: &str) -> String {
    let salt_bytes = BASE64.decode(salt).unwrap_or_else(|_| salt.as_bytes().to_vec());
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt_bytes, PBKDF2_ROUNDS, &mut out);
    BASE64.encode(out)
}

/// Compare a candidate password against a stored hash.
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    constant_time_eq(&hash_password(password, salt), expected_hash)
}

/// Generate a cryptographically secure session token.
pub fn generate_session_token() -> String {
    let mut token = [0u8; SESSION_TOKEN_LENGTH];
    rand::thread_rng().fill_bytes(&mut token);
    BASE64_URL.encode(token)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let secrets = SecretBox::new(test_key());
        let token = "agent-token-12345";

        let encrypted = secrets.encrypt(token).unwrap();
        assert!(SecretBox::is_encrypted(&encrypted));
        assert_ne!(encrypted, token);

        assert_eq!(secrets.decrypt(&encrypted).unwrap(), token);
    }

    #[test]
    fn no_double_encrypt() {
        let secrets = SecretBox::new(test_key());
        let encrypted = secrets.encrypt("secret").unwrap();
        assert_eq!(secrets.encrypt(&encrypted).unwrap(), encrypted);
    }

    #[test]
    fn different_nonces_differ() {
        let secrets = SecretBox::new(test_key());
        let a = secrets.encrypt("same").unwrap();
        let b = secrets.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(secrets.decrypt(&a).unwrap(), "same");
        assert_eq!(secrets.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn wrong_key_fails() {
        let secrets = SecretBox::new(test_key());
        let mut other = test_key();
        other[0] = 255;
        let other = SecretBox::new(other);

        let encrypted = secrets.encrypt("secret").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn plaintext_is_not_decryptable() {
        let secrets = SecretBox::new(test_key());
        assert!(secrets.decrypt("not-encrypted").is_err());
    }

    #[test]
    fn parse_key_hex_and_base64() {
        let key = test_key();
        assert_eq!(parse_key(&hex::encode(key)).unwrap(), key);
        assert_eq!(parse_key(&BASE64.encode(key)).unwrap(), key);
        assert!(parse_key("abc").is_err());
    }

    #[test]
    fn key_is_persisted_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_key(dir.path()).unwrap();
        let second = load_or_create_key(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn password_verification() {
        let salt = generate_salt();
        let hash = hash_password("hunter22", &salt);

        assert!(verify_password("hunter22", &salt, &hash));
        assert!(!verify_password("hunter23", &salt, &hash));
    }

    #[test]
    fn session_tokens_are_unique() {
        assert_ne!(generate_session_token(), generate_session_token());
    }
}
