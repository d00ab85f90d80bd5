//! OAuth token exchange logic.
//!
//! Exchanges an authorization code for provider tokens. Single attempt, no
//! retries; the caller decides what to do with a failure.

use super::provider::ProviderClient;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;

/// OAuth token response (OAuth 2.0 + OpenID Connect)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    /// Absolute expiry (epoch seconds); some providers send this instead of `expires_in`
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry wins over relative; neither leaves it unset.
    fn expires_at(&self, now: i64) -> Result<Option<i64>, ProviderExchangeError> {
        if self.expires_at.is_some() {
            return Ok(self.expires_at);
        }
        self.expires_in
            .map(|seconds| {
                now.checked_add(seconds).ok_or_else(|| {
                    ProviderExchangeError::MalformedBody(format!(
                        "expires_in out of range: {}",
                        seconds
                    ))
                })
            })
            .transpose()
    }
}

/// Tokens returned by a successful code exchange.
///
/// Ephemeral: validated and encrypted right away, never persisted as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderTokenBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry (epoch seconds)
    pub expires_at: Option<i64>,
    /// Raw identity token
    pub id_token: String,
}

/// Token exchange errors
#[derive(Debug, PartialEq, Clone)]
pub enum ProviderExchangeError {
    /// Provider unreachable or request could not be sent
    Request(String),
    /// No response within the configured timeout
    Timeout,
    /// Non-2xx response (bad or already-used code, bad client credentials)
    Status { status: u16, body: String },
    /// Response body is not a usable token response
    MalformedBody(String),
}

impl std::fmt::Display for ProviderExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderExchangeError::Request(msg) => {
                write!(f, "Failed to send token exchange request: {}", msg)
            }
            ProviderExchangeError::Timeout => write!(f, "Token exchange timed out"),
            ProviderExchangeError::Status { status, body } => {
                write!(f, "Token exchange failed with status {}: {}", status, body)
            }
            ProviderExchangeError::MalformedBody(msg) => {
                write!(f, "Failed to parse token response: {}", msg)
            }
        }
    }
}

impl std::error::Error for ProviderExchangeError {}

impl From<reqwest::Error> for ProviderExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderExchangeError::Timeout
        } else {
            ProviderExchangeError::Request(e.to_string())
        }
    }
}

fn parse_token_response(body: &str, now: i64) -> Result<ProviderTokenBundle, ProviderExchangeError> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ProviderExchangeError::MalformedBody(e.to_string()))?;

    let expires_at = response.expires_at(now)?;
    let id_token = response
        .id_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderExchangeError::MalformedBody("missing id_token".to_string()))?;

    Ok(ProviderTokenBundle {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at,
        id_token,
    })
}

impl ProviderClient {
    /// Exchange authorization code for provider tokens.
    ///
    /// POSTs the code, client credentials and redirect URL to the token
    /// endpoint as a form.
    pub async fn exchange_code(&self, code: &str) -> Result<ProviderTokenBundle, ProviderExchangeError> {
        let config = &self.config;

        let mut form_data = HashMap::new();
        form_data.insert("grant_type", "authorization_code");
        form_data.insert("code", code);
        form_data.insert("redirect_uri", config.redirect_url.as_str());
        form_data.insert("client_id", config.client_id.as_str());
        form_data.insert("client_secret", config.client_secret.as_str());

        tracing::debug!("Exchanging authorization code for token at {}", config.token_url);

        let response = self
            .http
            .post(&config.token_url)
            .header("Accept", "application/json")
            .form(&form_data)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bundle = parse_token_response(&body, Utc::now().timestamp())?;

        tracing::debug!(
            has_refresh_token = bundle.refresh_token.is_some(),
            expires_at = ?bundle.expires_at,
            "Token exchange successful"
        );

        Ok(bundle)
    }
}
