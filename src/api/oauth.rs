//! Provider login endpoints.

use super::{AppError, AuthAppState};
use crate::session::SessionCredential;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OAuth callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Response for the authorization URL endpoint
#[derive(Serialize)]
pub struct AuthorizationUrlResponse {
    pub authorization_url: String,
}

pub fn create_oauth_router(state: AuthAppState) -> Router {
    Router::new()
        .route(
            "/api/auth/google/authorization_url/",
            get(authorization_url),
        )
        .route("/api/auth/google/callback/", get(oauth_callback))
        .with_state(state)
}

/// GET /api/auth/google/authorization_url/
async fn authorization_url(State(state): State<AuthAppState>) -> Json<AuthorizationUrlResponse> {
    Json(AuthorizationUrlResponse {
        authorization_url: state.controller.begin_flow(),
    })
}

/// GET /api/auth/google/callback/
///
/// Exchanges the authorization code, links the account and returns a session pair.
async fn oauth_callback(
    State(state): State<AuthAppState>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<SessionCredential>, AppError> {
    debug!(
        has_code = callback.code.is_some(),
        error = ?callback.error,
        error_description = ?callback.error_description,
        "OAuth callback received"
    );

    let credential = state
        .controller
        .handle_callback(callback.code.as_deref(), callback.error.as_deref())
        .await?;

    Ok(Json(credential))
}
