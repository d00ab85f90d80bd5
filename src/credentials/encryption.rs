//! AES-256-GCM encryption for provider tokens stored at rest.
//!
//! Each token is sealed under a fresh random nonce. The stored envelope is
//! `base64(nonce || ciphertext)`, so a single opaque string per token is
//! enough to decrypt it again.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::warn;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag appended to every ciphertext
const TAG_SIZE: usize = 16;

/// Token encryption errors
#[derive(Debug, PartialEq, Clone)]
pub enum CryptoError {
    /// Configured key material is not base64 or not 32 bytes
    InvalidKey(String),
    /// Envelope is not valid base64 or does not decode to UTF-8
    Malformed(String),
    /// Envelope is shorter than nonce + tag
    Truncated { len: usize },
    /// Authentication failed (wrong key or tampered data)
    DecryptionFailed,
    /// AEAD refused to seal the plaintext
    EncryptionFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKey(msg) => write!(f, "Invalid encryption key: {}", msg),
            CryptoError::Malformed(msg) => write!(f, "Malformed ciphertext: {}", msg),
            CryptoError::Truncated { len } => write!(
                f,
                "Ciphertext truncated: {} bytes, need at least {}",
                len,
                NONCE_SIZE + TAG_SIZE
            ),
            CryptoError::DecryptionFailed => {
                write!(f, "Decryption failed (wrong key or corrupted data)")
            }
            CryptoError::EncryptionFailed => write!(f, "Encryption failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Validates that the key material is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>, CryptoError> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("not valid base64: {}", e)))?;

    if key_bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

/// Process-wide symmetric cipher for provider tokens.
///
/// Built once at startup and shared behind an `Arc`. The key never changes
/// for the lifetime of the process.
///
/// # Operational hazard
/// When no key is configured a fresh one is generated. Tokens written under a
/// generated key cannot be decrypted after a restart; linked identities must
/// then be re-linked by logging in again.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
    generated: bool,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Builds a cipher from base64-encoded 32-byte key material.
    pub fn from_base64_key(key_base64: &str) -> Result<Self, CryptoError> {
        let key_bytes = validate_key(key_base64)?;
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        Ok(Self {
            cipher,
            generated: false,
        })
    }

    /// Builds a cipher under a freshly generated random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
            generated: true,
        }
    }

    /// Uses the configured key if there is one, otherwise generates a key.
    pub fn from_config(key_base64: Option<&str>) -> Result<Self, CryptoError> {
        match key_base64.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Self::from_base64_key(key),
            None => {
                warn!(
                    "No token encryption key configured; generated an ephemeral key. \
                     Provider tokens stored now become undecryptable after a restart. \
                     Set TETHER_TOKEN_KEY to a base64-encoded 32-byte key."
                );
                Ok(Self::generate())
            }
        }
    }

    /// Whether the key was generated at startup instead of configured.
    pub fn is_ephemeral(&self) -> bool {
        self.generated
    }

    /// Encrypts a token under a random nonce.
    ///
    /// Two calls with the same plaintext yield different envelopes.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(envelope))
    }

    /// Decrypts an envelope produced by [`TokenCipher::encrypt`].
    pub fn decrypt(&self, envelope: &str) -> Result<String, CryptoError> {
        let bytes = BASE64
            .decode(envelope)
            .map_err(|e| CryptoError::Malformed(format!("not valid base64: {}", e)))?;

        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated { len: bytes.len() });
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Malformed("decrypted data is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher(fill: u8) -> TokenCipher {
        TokenCipher::from_base64_key(&BASE64.encode([fill; 32])).expect("valid test key")
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key(&BASE64.encode([0u8; 32])).is_ok());

        // Too short
        assert!(validate_key(&BASE64.encode([0u8; 16])).is_err());

        // Too long
        assert!(validate_key(&BASE64.encode([0u8; 64])).is_err());

        // Invalid base64
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher(0);
        let plaintext = "ya29.a0AfH6SMBx-access-token";

        let envelope = cipher.encrypt(plaintext).unwrap();
        assert_ne!(envelope, plaintext);
        assert_eq!(cipher.decrypt(&envelope).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = test_cipher(0);
        let envelope = cipher.encrypt("").unwrap();
        assert_eq!(cipher.decrypt(&envelope).unwrap(), "");
    }

    #[test]
    fn test_encryption_is_not_deterministic() {
        let cipher = test_cipher(0);

        let first = cipher.encrypt("same-token").unwrap();
        let second = cipher.encrypt("same-token").unwrap();
        assert_ne!(first, second);

        assert_eq!(cipher.decrypt(&first).unwrap(), "same-token");
        assert_eq!(cipher.decrypt(&second).unwrap(), "same-token");
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = test_cipher(0).encrypt("secret").unwrap();
        assert_eq!(
            test_cipher(1).decrypt(&envelope),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_truncated_envelope_fails() {
        let cipher = test_cipher(0);
        let envelope = cipher.encrypt("secret").unwrap();
        let bytes = BASE64.decode(&envelope).unwrap();
        let short = BASE64.encode(&bytes[..NONCE_SIZE + 4]);

        assert_eq!(
            cipher.decrypt(&short),
            Err(CryptoError::Truncated {
                len: NONCE_SIZE + 4
            })
        );
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let cipher = test_cipher(0);
        let envelope = cipher.encrypt("secret").unwrap();
        let mut bytes = BASE64.decode(&envelope).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert_eq!(
            cipher.decrypt(&BASE64.encode(bytes)),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_malformed_envelope_fails() {
        let cipher = test_cipher(0);
        assert!(matches!(
            cipher.decrypt("%%% not base64 %%%"),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_from_config_generates_when_absent() {
        let cipher = TokenCipher::from_config(None).unwrap();
        assert!(cipher.is_ephemeral());

        let cipher = TokenCipher::from_config(Some("  ")).unwrap();
        assert!(cipher.is_ephemeral());

        let key = BASE64.encode([7u8; 32]);
        let cipher = TokenCipher::from_config(Some(&key)).unwrap();
        assert!(!cipher.is_ephemeral());
    }

    #[test]
    fn test_generated_keys_differ() {
        let envelope = TokenCipher::generate().encrypt("secret").unwrap();
        assert!(TokenCipher::generate().decrypt(&envelope).is_err());
    }
}
