//! OAuth provider configuration and authorization URL building.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Provider name stored on linked identities
pub const GOOGLE_PROVIDER: &str = "google";

/// Default Google authorization endpoint
pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Default Google token endpoint
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name recorded on linked identities
    #[serde(default = "default_name")]
    pub name: String,

    /// OAuth authorization endpoint URL
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    /// OAuth token exchange endpoint URL
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Scopes requested when starting the flow
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub client_id: String,

    #[serde(default, skip_serializing)]
    pub client_secret: String,

    /// Callback URL; must match the one registered with the provider
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,

    /// Upper bound for the token exchange request
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_name() -> String {
    GOOGLE_PROVIDER.to_string()
}

fn default_authorize_url() -> String {
    GOOGLE_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["profile".to_string(), "email".to_string()]
}

fn default_redirect_url() -> String {
    "http://localhost:8000/api/auth/google/callback/".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: default_redirect_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl ProviderConfig {
    /// Build authorization URL for the given scopes.
    ///
    /// Duplicate scopes are dropped, first occurrence wins.
    pub fn build_auth_url(&self, scopes: &[String]) -> String {
        let mut unique: Vec<&str> = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if !unique.contains(&scope.as_str()) {
                unique.push(scope.as_str());
            }
        }
        let scopes = unique.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&response_type=code",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(&scopes),
        )
    }
}

/// Talks to the provider's endpoints.
///
/// Holds one HTTP client with the configured timeout for the process lifetime.
#[derive(Clone, Debug)]
pub struct ProviderClient {
    pub(super) config: ProviderConfig,
    pub(super) http: reqwest::Client,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build provider HTTP client")?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Authorization URL for the given scopes; the caller issues the redirect.
    pub fn build_authorization_url(&self, scopes: &[String]) -> String {
        self.config.build_auth_url(scopes)
    }
}
