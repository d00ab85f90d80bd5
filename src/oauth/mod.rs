//! Third-party login flow.
//!
//! Implements the authorization code flow:
//! 1. Client asks for the authorization URL and redirects the user there
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back with `code` (or `error`)
//! 4. Exchange code for tokens, validate the identity token
//! 5. Resolve the local account, store encrypted provider tokens
//! 6. Issue a local session credential

mod exchange;
mod provider;

pub use exchange::{ProviderExchangeError, ProviderTokenBundle};
pub use provider::{
    ProviderClient, ProviderConfig, GOOGLE_AUTHORIZE_URL, GOOGLE_PROVIDER, GOOGLE_TOKEN_URL,
};

use crate::accounts::{
    AccountLinkError, AccountLinker, AccountResolutionStrategy, EmailFirst, ExternalProfile,
    IdentityGrant, Resolution,
};
use crate::identity::{IdentityClaims, IdentityTokenValidator, TokenValidationError};
use crate::session::{SessionCredential, SessionIssueError, SessionIssuer};
use tokio::task;
use tracing::{debug, info, warn};

/// Callback rejected before contacting the provider
#[derive(Debug, PartialEq, Clone)]
pub enum CallbackError {
    /// No authorization code in the callback
    MissingCode,
    /// Provider reported an error (user cancelled, access denied)
    ProviderDenied(String),
}

impl CallbackError {
    /// Machine-readable reason for the response body
    pub fn reason(&self) -> &'static str {
        match self {
            CallbackError::MissingCode => "missing_code",
            CallbackError::ProviderDenied(_) => "provider_denied",
        }
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackError::MissingCode => write!(f, "Missing 'code' parameter"),
            CallbackError::ProviderDenied(error) => {
                write!(f, "OAuth authorization failed: {}", error)
            }
        }
    }
}

impl std::error::Error for CallbackError {}

/// Any failure of the login flow, tagged by the step that failed
#[derive(Debug, PartialEq, Clone)]
pub enum FlowError {
    Callback(CallbackError),
    Exchange(ProviderExchangeError),
    Validation(TokenValidationError),
    Link(AccountLinkError),
    Session(SessionIssueError),
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::Callback(e) => write!(f, "{}", e),
            FlowError::Exchange(e) => write!(f, "{}", e),
            FlowError::Validation(e) => write!(f, "{}", e),
            FlowError::Link(e) => write!(f, "{}", e),
            FlowError::Session(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<CallbackError> for FlowError {
    fn from(e: CallbackError) -> Self {
        FlowError::Callback(e)
    }
}

impl From<ProviderExchangeError> for FlowError {
    fn from(e: ProviderExchangeError) -> Self {
        FlowError::Exchange(e)
    }
}

impl From<TokenValidationError> for FlowError {
    fn from(e: TokenValidationError) -> Self {
        FlowError::Validation(e)
    }
}

impl From<AccountLinkError> for FlowError {
    fn from(e: AccountLinkError) -> Self {
        FlowError::Link(e)
    }
}

impl From<SessionIssueError> for FlowError {
    fn from(e: SessionIssueError) -> Self {
        FlowError::Session(e)
    }
}

/// Checks callback parameters. A provider error wins over a present code;
/// empty values count as absent.
pub fn check_callback<'a>(
    code: Option<&'a str>,
    error: Option<&str>,
) -> Result<&'a str, CallbackError> {
    if let Some(error) = error.filter(|e| !e.is_empty()) {
        return Err(CallbackError::ProviderDenied(error.to_string()));
    }
    code.filter(|c| !c.is_empty()).ok_or(CallbackError::MissingCode)
}

/// Orchestrates begin-flow and callback handling.
pub struct OAuthFlowController {
    provider: ProviderClient,
    validator: IdentityTokenValidator,
    linker: AccountLinker,
    sessions: SessionIssuer,
}

impl OAuthFlowController {
    pub fn new(
        provider: ProviderClient,
        validator: IdentityTokenValidator,
        linker: AccountLinker,
        sessions: SessionIssuer,
    ) -> Self {
        Self {
            provider,
            validator,
            linker,
            sessions,
        }
    }

    pub fn linker(&self) -> &AccountLinker {
        &self.linker
    }

    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    /// Authorization URL requesting the provider's configured scopes.
    pub fn begin_flow(&self) -> String {
        let config = self.provider.config();
        debug!(provider = %config.name, "Building authorization URL");
        self.provider.build_authorization_url(&config.scopes)
    }

    /// Completes the login with the email-first policy.
    pub async fn handle_callback(
        &self,
        code: Option<&str>,
        error: Option<&str>,
    ) -> Result<SessionCredential, FlowError> {
        self.handle_callback_with(EmailFirst, code, error).await
    }

    /// Completes the login with an explicit resolution policy.
    pub async fn handle_callback_with<S>(
        &self,
        strategy: S,
        code: Option<&str>,
        error: Option<&str>,
    ) -> Result<SessionCredential, FlowError>
    where
        S: AccountResolutionStrategy + 'static,
    {
        let provider = &self.provider.config().name;

        let code = check_callback(code, error).inspect_err(|e| {
            warn!(provider = %provider, reason = e.reason(), "OAuth callback rejected");
        })?;

        let bundle = self.provider.exchange_code(code).await.inspect_err(|e| {
            warn!(provider = %provider, error = %e, "Token exchange failed");
        })?;

        let claims = self.validator.validate(&bundle.id_token).inspect_err(|e| {
            warn!(provider = %provider, error = %e, "Identity token rejected");
        })?;

        let resolution = self.link(strategy, &bundle, &claims).await?;
        let credential = self.sessions.issue(&resolution.account)?;

        info!(
            provider = %provider,
            account_id = %resolution.account.id,
            outcome = resolution.outcome.as_str(),
            has_refresh_token = bundle.refresh_token.is_some(),
            "OAuth login completed"
        );

        Ok(credential)
    }

    /// Runs the resolution on the blocking pool; the SQLite transaction may
    /// wait on the database lock.
    async fn link<S>(
        &self,
        strategy: S,
        bundle: &ProviderTokenBundle,
        claims: &IdentityClaims,
    ) -> Result<Resolution, AccountLinkError>
    where
        S: AccountResolutionStrategy + 'static,
    {
        let grant = IdentityGrant {
            provider: self.provider.config().name.clone(),
            subject_id: claims.sub.clone(),
            access_token: bundle.access_token.clone(),
            refresh_token: bundle.refresh_token.clone(),
            expires_at: bundle.expires_at,
            account_email: claims.email.clone(),
        };

        let profile = ExternalProfile::from(claims);
        let provider = grant.provider.clone();
        let linker = self.linker.clone();

        task::spawn_blocking(move || linker.resolve(&strategy, &profile, &grant))
            .await
            .map_err(|e| AccountLinkError::Store(format!("Account linking task failed: {}", e)))
            .and_then(|result| result)
            .inspect_err(|e| {
                warn!(provider = %provider, error = %e, "Account linking failed");
            })
    }
}
