//! Local session credentials.
//!
//! A session credential is an HS256-signed access/refresh pair bound to a
//! local account id. Nothing is stored server-side and no revocation list is
//! consulted.

use crate::accounts::LocalAccount;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default access credential lifetime (7 days)
pub const DEFAULT_ACCESS_LIFETIME_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Default refresh credential lifetime (30 days)
pub const DEFAULT_REFRESH_LIFETIME_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Upper bound for either lifetime (10 years)
pub const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Which half of the pair a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both session tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub token_type: TokenKind,
    pub exp: i64,
    pub iat: i64,
    /// Unique token id (UUID v4)
    pub jti: String,
    /// Local account id
    pub user_id: String,
}

/// Access/refresh pair returned to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub access: String,
    pub refresh: String,
}

/// Session issuance errors (signing-key misconfiguration)
#[derive(Debug, PartialEq, Clone)]
pub enum SessionIssueError {
    /// No signing secret configured
    MissingSecret,
    /// Lifetime is not within `1..=MAX_LIFETIME_SECONDS`
    InvalidLifetime(i64),
    /// JWT encoding failed
    Signing(String),
}

impl std::fmt::Display for SessionIssueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionIssueError::MissingSecret => write!(f, "Session signing secret is not configured"),
            SessionIssueError::InvalidLifetime(secs) => {
                write!(
                    f,
                    "Session lifetime must be between 1 and {} seconds, got {}",
                    MAX_LIFETIME_SECONDS, secs
                )
            }
            SessionIssueError::Signing(msg) => write!(f, "Failed to sign session credential: {}", msg),
        }
    }
}

impl std::error::Error for SessionIssueError {}

/// Session verification errors
#[derive(Debug, PartialEq, Clone)]
pub enum SessionVerifyError {
    /// Bad signature or structure
    Invalid(String),
    Expired,
    /// Token is valid but of the other kind
    WrongKind { expected: TokenKind, got: TokenKind },
    /// Re-issuing after a successful verification failed
    Issue(SessionIssueError),
}

impl std::fmt::Display for SessionVerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionVerifyError::Invalid(msg) => write!(f, "Invalid session token: {}", msg),
            SessionVerifyError::Expired => write!(f, "Session token expired"),
            SessionVerifyError::WrongKind { expected, got } => write!(
                f,
                "Expected {:?} token, got {:?} token",
                expected, got
            ),
            SessionVerifyError::Issue(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionVerifyError {}

/// Issues and verifies session credentials with a process-wide secret.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl SessionIssuer {
    /// Creates an issuer. Fails when the secret is empty or a lifetime is out of range.
    pub fn new(
        secret: &str,
        access_lifetime_seconds: i64,
        refresh_lifetime_seconds: i64,
    ) -> Result<Self, SessionIssueError> {
        if secret.is_empty() {
            return Err(SessionIssueError::MissingSecret);
        }
        for secs in [access_lifetime_seconds, refresh_lifetime_seconds] {
            if !(1..=MAX_LIFETIME_SECONDS).contains(&secs) {
                return Err(SessionIssueError::InvalidLifetime(secs));
            }
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_lifetime: Duration::seconds(access_lifetime_seconds),
            refresh_lifetime: Duration::seconds(refresh_lifetime_seconds),
        })
    }

    /// Creates an issuer with 7-day access and 30-day refresh lifetimes.
    pub fn with_default_lifetimes(secret: &str) -> Result<Self, SessionIssueError> {
        Self::new(
            secret,
            DEFAULT_ACCESS_LIFETIME_SECONDS,
            DEFAULT_REFRESH_LIFETIME_SECONDS,
        )
    }

    /// Issues a fresh access/refresh pair for `account`.
    pub fn issue(&self, account: &LocalAccount) -> Result<SessionCredential, SessionIssueError> {
        let now = Utc::now().timestamp();
        Ok(SessionCredential {
            access: self.sign(&account.id, TokenKind::Access, now)?,
            refresh: self.sign(&account.id, TokenKind::Refresh, now)?,
        })
    }

    /// Verifies signature, expiry and kind of `token`.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<SessionClaims, SessionVerifyError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionVerifyError::Expired,
                _ => SessionVerifyError::Invalid(e.to_string()),
            })?;

        if claims.token_type != expected {
            return Err(SessionVerifyError::WrongKind {
                expected,
                got: claims.token_type,
            });
        }

        Ok(claims)
    }

    /// Exchanges a valid refresh credential for a new access credential.
    pub fn refresh_access(&self, refresh_token: &str) -> Result<String, SessionVerifyError> {
        let claims = self.verify(refresh_token, TokenKind::Refresh)?;
        self.sign(&claims.user_id, TokenKind::Access, Utc::now().timestamp())
            .map_err(SessionVerifyError::Issue)
    }

    fn sign(&self, user_id: &str, kind: TokenKind, now: i64) -> Result<String, SessionIssueError> {
        let lifetime = match kind {
            TokenKind::Access => self.access_lifetime,
            TokenKind::Refresh => self.refresh_lifetime,
        };

        let claims = SessionClaims {
            token_type: kind,
            exp: now + lifetime.num_seconds(),
            iat: now,
            jti: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionIssueError::Signing(e.to_string()))
    }
}
