//! Encryption of provider tokens at rest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       AccountLinker                      │
//! │  - persists linked identities            │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-GCM                           │
//! │  - Unique nonce per token                │
//! │  - One key per process                   │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite (linked_identities)         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tether::credentials::TokenCipher;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("TETHER_TOKEN_KEY").ok();
//! let cipher = TokenCipher::from_config(key.as_deref())?;
//!
//! let stored = cipher.encrypt("provider_access_token")?;
//! assert_eq!(cipher.decrypt(&stored)?, "provider_access_token");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

mod encryption;

pub use encryption::{validate_key, CryptoError, TokenCipher};

/// Decrypted provider tokens of a linked identity.
///
/// Only ever materialized on demand; stored rows keep the encrypted form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderTokens {
    /// OAuth access token issued by the provider
    pub access_token: String,

    /// OAuth refresh token, if the provider issued one
    pub refresh_token: Option<String>,

    /// Absolute expiry of the access token (epoch seconds)
    pub expires_at: Option<i64>,
}
