//! Local accounts and the external identities linked to them.
//!
//! A `LocalAccount` owns at most one `LinkedIdentity` per provider, and a
//! `(provider, subject_id)` pair belongs to at most one account. Both rules
//! are enforced by SQLite unique constraints; `AccountLinker` decides which
//! rows to create or refresh inside a single transaction.

use crate::credentials::CryptoError;
use crate::identity::IdentityClaims;
use chrono::{DateTime, Utc};
use serde::Serialize;

mod linker;
mod store;

#[cfg(test)]
mod tests;

pub use linker::{
    AccountLinker, AccountResolutionStrategy, EmailFirst, LinkOutcome, LinkTx, Resolution,
    SubjectFirst,
};
pub use store::{AccountStore, StoreError};

/// A user of this system.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocalAccount {
    /// UUID v7
    pub id: String,
    /// Normalized (trimmed, lower-case) email, unique
    pub email: String,
    /// Absent for accounts created through OAuth only
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a local account.
#[derive(Clone, Debug, Default)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
}

/// Binding of one local account to one `(provider, subject_id)` pair.
///
/// Token fields hold `TokenCipher` envelopes, never plaintext. An absent
/// refresh token is stored as an empty string.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedIdentity {
    pub id: i64,
    pub account_id: String,
    pub provider: String,
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (epoch seconds)
    pub expires_at: Option<i64>,
    /// Email the provider reported, informational only
    pub account_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile attributes reported by the provider, used when creating an account.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalProfile {
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub avatar: String,
}

impl From<&IdentityClaims> for ExternalProfile {
    fn from(claims: &IdentityClaims) -> Self {
        Self {
            email: claims.email.clone(),
            first_name: claims.given_name.clone().unwrap_or_default(),
            last_name: claims.family_name.clone().unwrap_or_default(),
            display_name: claims.name.clone().unwrap_or_default(),
            avatar: claims.picture.clone().unwrap_or_default(),
        }
    }
}

/// Plaintext provider tokens for one external identity, ready to be persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityGrant {
    /// Provider name, e.g. "google"
    pub provider: String,
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry (epoch seconds)
    pub expires_at: Option<i64>,
    pub account_email: Option<String>,
}

/// Trims and lower-cases an email. Returns `None` for blank input.
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim();
    if email.is_empty() {
        None
    } else {
        Some(email.to_lowercase())
    }
}

/// Account linking errors
#[derive(Debug, PartialEq, Clone)]
pub enum AccountLinkError {
    /// A new account is needed but the provider reported no email
    MissingEmail,
    /// Unique constraint violated (concurrent duplicate link, provider already linked)
    Conflict(String),
    /// The identity row for this subject belongs to another account than the email match
    IdentityOwnedByOtherAccount {
        subject_id: String,
        account_id: String,
    },
    /// Token could not be encrypted for storage
    Crypto(CryptoError),
    /// Any other persistence failure
    Store(String),
}

impl std::fmt::Display for AccountLinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountLinkError::MissingEmail => {
                write!(f, "Provider did not report an email; cannot create account")
            }
            AccountLinkError::Conflict(msg) => write!(f, "Account link conflict: {}", msg),
            AccountLinkError::IdentityOwnedByOtherAccount {
                subject_id,
                account_id,
            } => write!(
                f,
                "Identity '{}' is already linked to account {}",
                subject_id, account_id
            ),
            AccountLinkError::Crypto(e) => write!(f, "Token encryption failed: {}", e),
            AccountLinkError::Store(msg) => write!(f, "Account store failure: {}", msg),
        }
    }
}

impl std::error::Error for AccountLinkError {}

impl From<StoreError> for AccountLinkError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AccountLinkError::Conflict(msg),
            other => AccountLinkError::Store(other.to_string()),
        }
    }
}

impl From<CryptoError> for AccountLinkError {
    fn from(e: CryptoError) -> Self {
        AccountLinkError::Crypto(e)
    }
}
