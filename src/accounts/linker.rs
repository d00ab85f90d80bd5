//! Reconciliation of an external identity against local account state.
//!
//! Two resolution policies exist and callers choose one:
//!
//! - [`SubjectFirst`]: look the identity up by `(provider, subject_id)`. A hit
//!   refreshes its tokens; a miss creates (or reuses, keyed by email) a local
//!   account and links it.
//! - [`EmailFirst`]: look the local account up by the reported email. A hit
//!   refreshes the existing identity or attaches a new one to that account; a
//!   miss falls through to the same create path.
//!
//! Both reuse an existing account whose email matches without asking the user
//! to confirm the link. Every resolution runs in one immediate transaction.

use super::store::{self, AccountStore, NewLinkedIdentity};
use super::{
    normalize_email, AccountLinkError, ExternalProfile, IdentityGrant, LinkedIdentity,
    LocalAccount, NewAccount,
};
use crate::credentials::{CryptoError, ProviderTokens, TokenCipher};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info};

/// What a resolution did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// New local account and new linked identity
    CreatedAccount,
    /// Existing local account (matched by email), new linked identity
    LinkedExisting,
    /// Existing linked identity, tokens replaced
    RefreshedTokens,
}

impl LinkOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkOutcome::CreatedAccount => "created_account",
            LinkOutcome::LinkedExisting => "linked_existing",
            LinkOutcome::RefreshedTokens => "refreshed_tokens",
        }
    }
}

/// Result of resolving an external identity
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub account: LocalAccount,
    pub identity: LinkedIdentity,
    pub outcome: LinkOutcome,
}

/// Account operations available to a strategy inside the linking transaction.
///
/// Tokens are encrypted here, so strategies only ever handle plaintext grants.
pub struct LinkTx<'a> {
    conn: &'a Connection,
    cipher: &'a TokenCipher,
}

impl<'a> LinkTx<'a> {
    pub fn find_identity(
        &self,
        provider: &str,
        subject_id: &str,
    ) -> Result<Option<LinkedIdentity>, AccountLinkError> {
        Ok(store::select_identity(self.conn, provider, subject_id)?)
    }

    pub fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<LocalAccount>, AccountLinkError> {
        Ok(store::select_account_by_email(self.conn, email)?)
    }

    /// Loads the account owning `identity`.
    pub fn owner_of(&self, identity: &LinkedIdentity) -> Result<LocalAccount, AccountLinkError> {
        store::select_account(self.conn, &identity.account_id)?.ok_or_else(|| {
            AccountLinkError::Store(format!(
                "linked identity {} references missing account {}",
                identity.id, identity.account_id
            ))
        })
    }

    fn encrypt_tokens(&self, grant: &IdentityGrant) -> Result<(String, String), CryptoError> {
        let access = self.cipher.encrypt(&grant.access_token)?;
        let refresh = match grant.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => self.cipher.encrypt(token)?,
            None => String::new(),
        };
        Ok((access, refresh))
    }

    /// Replaces tokens and expiry of `identity` with those in `grant`.
    pub fn refresh_tokens(
        &self,
        identity: &LinkedIdentity,
        grant: &IdentityGrant,
    ) -> Result<LinkedIdentity, AccountLinkError> {
        let (access, refresh) = self.encrypt_tokens(grant)?;
        Ok(store::update_identity_tokens(
            self.conn,
            identity.id,
            &access,
            &refresh,
            grant.expires_at,
        )?)
    }

    /// Creates a linked identity for `account` from `grant`.
    pub fn attach_identity(
        &self,
        account: &LocalAccount,
        grant: &IdentityGrant,
    ) -> Result<LinkedIdentity, AccountLinkError> {
        let (access, refresh) = self.encrypt_tokens(grant)?;
        Ok(store::insert_identity(
            self.conn,
            &NewLinkedIdentity {
                account_id: &account.id,
                provider: &grant.provider,
                subject_id: &grant.subject_id,
                access_token: &access,
                refresh_token: &refresh,
                expires_at: grant.expires_at,
                account_email: grant.account_email.as_deref(),
            },
        )?)
    }

    /// Finds the account by the profile email or creates a password-less one,
    /// then links the identity to it.
    pub fn create_account_and_identity(
        &self,
        profile: &ExternalProfile,
        grant: &IdentityGrant,
    ) -> Result<Resolution, AccountLinkError> {
        let email = profile
            .email
            .as_deref()
            .and_then(normalize_email)
            .ok_or(AccountLinkError::MissingEmail)?;

        let (account, outcome) = match store::select_account_by_email(self.conn, &email)? {
            Some(account) => (account, LinkOutcome::LinkedExisting),
            None => {
                let account = store::insert_account(
                    self.conn,
                    &NewAccount {
                        email,
                        password_hash: None,
                        first_name: profile.first_name.clone(),
                        last_name: profile.last_name.clone(),
                        display_name: profile.display_name.clone(),
                    },
                )?;
                (account, LinkOutcome::CreatedAccount)
            }
        };

        let identity = self.attach_identity(&account, grant)?;

        Ok(Resolution {
            account,
            identity,
            outcome,
        })
    }
}

/// A policy for mapping an external identity onto a local account.
pub trait AccountResolutionStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn resolve(
        &self,
        tx: &LinkTx<'_>,
        profile: &ExternalProfile,
        grant: &IdentityGrant,
    ) -> Result<Resolution, AccountLinkError>;
}

/// Looks up by `(provider, subject_id)` first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectFirst;

impl AccountResolutionStrategy for SubjectFirst {
    fn name(&self) -> &'static str {
        "subject_first"
    }

    fn resolve(
        &self,
        tx: &LinkTx<'_>,
        profile: &ExternalProfile,
        grant: &IdentityGrant,
    ) -> Result<Resolution, AccountLinkError> {
        match tx.find_identity(&grant.provider, &grant.subject_id)? {
            Some(identity) => {
                let account = tx.owner_of(&identity)?;
                let identity = tx.refresh_tokens(&identity, grant)?;
                Ok(Resolution {
                    account,
                    identity,
                    outcome: LinkOutcome::RefreshedTokens,
                })
            }
            None => tx.create_account_and_identity(profile, grant),
        }
    }
}

/// Looks up the local account by the reported email first.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailFirst;

impl AccountResolutionStrategy for EmailFirst {
    fn name(&self) -> &'static str {
        "email_first"
    }

    fn resolve(
        &self,
        tx: &LinkTx<'_>,
        profile: &ExternalProfile,
        grant: &IdentityGrant,
    ) -> Result<Resolution, AccountLinkError> {
        let existing = match profile.email.as_deref() {
            Some(email) => tx.find_account_by_email(email)?,
            None => None,
        };

        let Some(account) = existing else {
            return tx.create_account_and_identity(profile, grant);
        };

        match tx.find_identity(&grant.provider, &grant.subject_id)? {
            Some(identity) if identity.account_id == account.id => {
                let identity = tx.refresh_tokens(&identity, grant)?;
                Ok(Resolution {
                    account,
                    identity,
                    outcome: LinkOutcome::RefreshedTokens,
                })
            }
            Some(identity) => Err(AccountLinkError::IdentityOwnedByOtherAccount {
                subject_id: identity.subject_id,
                account_id: identity.account_id,
            }),
            None => {
                let identity = tx.attach_identity(&account, grant)?;
                Ok(Resolution {
                    account,
                    identity,
                    outcome: LinkOutcome::LinkedExisting,
                })
            }
        }
    }
}

/// Resolves external identities to local accounts and persists provider tokens.
#[derive(Clone)]
pub struct AccountLinker {
    store: Arc<AccountStore>,
    cipher: Arc<TokenCipher>,
}

impl AccountLinker {
    pub fn new(store: Arc<AccountStore>, cipher: Arc<TokenCipher>) -> Self {
        Self { store, cipher }
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    /// Runs `strategy` in a single transaction.
    ///
    /// Either every write of the resolution is committed or none is. A
    /// concurrent duplicate that slips past the lookups fails on the unique
    /// constraint and surfaces as `AccountLinkError::Conflict`.
    pub fn resolve(
        &self,
        strategy: &dyn AccountResolutionStrategy,
        profile: &ExternalProfile,
        grant: &IdentityGrant,
    ) -> Result<Resolution, AccountLinkError> {
        debug!(
            strategy = strategy.name(),
            provider = %grant.provider,
            "Resolving external identity"
        );

        let resolution = self.store.transaction(|conn| {
            let tx = LinkTx {
                conn,
                cipher: &self.cipher,
            };
            strategy.resolve(&tx, profile, grant)
        })?;

        info!(
            strategy = strategy.name(),
            provider = %grant.provider,
            account_id = %resolution.account.id,
            outcome = resolution.outcome.as_str(),
            "External identity resolved"
        );

        Ok(resolution)
    }

    pub fn resolve_subject_first(
        &self,
        profile: &ExternalProfile,
        grant: &IdentityGrant,
    ) -> Result<Resolution, AccountLinkError> {
        self.resolve(&SubjectFirst, profile, grant)
    }

    pub fn resolve_email_first(
        &self,
        profile: &ExternalProfile,
        grant: &IdentityGrant,
    ) -> Result<Resolution, AccountLinkError> {
        self.resolve(&EmailFirst, profile, grant)
    }

    /// Decrypts the stored tokens of `identity`.
    ///
    /// Fails for identities written under another key; the identity stays
    /// usable for login and is repaired by the next token refresh.
    pub fn provider_tokens(&self, identity: &LinkedIdentity) -> Result<ProviderTokens, CryptoError> {
        let access_token = self.cipher.decrypt(&identity.access_token)?;
        let refresh_token = if identity.refresh_token.is_empty() {
            None
        } else {
            Some(self.cipher.decrypt(&identity.refresh_token)?)
        };

        Ok(ProviderTokens {
            access_token,
            refresh_token,
            expires_at: identity.expires_at,
        })
    }
}
