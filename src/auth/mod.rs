use crate::session::{SessionClaims, SessionIssuer, SessionVerifyError, TokenKind};
use axum::http::HeaderMap;


/// Authenticate a request by its session access credential
///
/// Expects "Authorization: Bearer <access credential>".
pub fn authenticate(headers: &HeaderMap, sessions: &SessionIssuer) -> Result<SessionClaims, AuthError> {
    let token = extract_bearer_token(headers).map_err(AuthError::Token)?;
    sessions
        .verify(&token, TokenKind::Access)
        .map_err(AuthError::Session)
}

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let Some((scheme, token)) = header_value.split_once(' ') else {
        return Err(TokenError::InvalidFormat);
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header not present
    Missing,
    /// Not "Bearer <token>"
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Request authentication errors
#[derive(Debug, PartialEq, Clone)]
pub enum AuthError {
    Token(TokenError),
    Session(SessionVerifyError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Token(e) => write!(f, "{}", e),
            AuthError::Session(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AuthError {}
