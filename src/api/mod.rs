//! HTTP surface for the login flow.
//!
//! - `GET  /api/auth/google/authorization_url/` returns the provider consent URL
//! - `GET  /api/auth/google/callback/` completes the flow and returns a session pair
//! - `GET  /api/auth/me` describes the authenticated account
//! - `POST /api/auth/token/refresh/` trades a refresh credential for an access credential

pub mod oauth;
pub mod session;

use crate::accounts::AccountLinkError;
use crate::auth::AuthError;
use crate::oauth::{FlowError, OAuthFlowController};
use crate::session::SessionVerifyError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub use oauth::create_oauth_router;
pub use session::create_session_router;

/// Shared application state for the auth API
#[derive(Clone)]
pub struct AuthAppState {
    pub controller: Arc<OAuthFlowController>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

/// Application error types for auth endpoints
#[derive(Debug)]
pub enum AppError {
    /// Rejected callback; carries the machine-readable reason
    Callback { reason: &'static str, message: String },
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, reason) = match self {
            AppError::Callback { reason, message } => {
                (StatusCode::BAD_REQUEST, message, Some(reason))
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            reason,
        });

        (status, body).into_response()
    }
}

impl From<FlowError> for AppError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::Callback(e) => AppError::Callback {
                reason: e.reason(),
                message: e.to_string(),
            },
            FlowError::Exchange(e) => AppError::Unauthorized(e.to_string()),
            FlowError::Validation(e) => AppError::Unauthorized(e.to_string()),
            FlowError::Link(e) => e.into(),
            FlowError::Session(e) => AppError::ServerError(e.to_string()),
        }
    }
}

impl From<AccountLinkError> for AppError {
    fn from(e: AccountLinkError) -> Self {
        match e {
            AccountLinkError::MissingEmail => AppError::BadRequest(e.to_string()),
            AccountLinkError::Conflict(_)
            | AccountLinkError::IdentityOwnedByOtherAccount { .. } => {
                AppError::Conflict(e.to_string())
            }
            AccountLinkError::Crypto(_) | AccountLinkError::Store(_) => {
                AppError::ServerError(e.to_string())
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Session(SessionVerifyError::Issue(e)) => AppError::ServerError(e.to_string()),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

/// Build the complete auth router with permissive CORS
pub fn create_auth_router(state: AuthAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_oauth_router(state.clone())
        .merge(create_session_router(state))
        .layer(cors)
}
