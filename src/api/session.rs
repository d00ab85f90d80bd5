//! Session endpoints for signed-in accounts.

use super::{AppError, AuthAppState};
use crate::accounts::LocalAccount;
use crate::auth::authenticate;
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Request body for POST /api/auth/token/refresh/
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Response for POST /api/auth/token/refresh/
#[derive(Serialize)]
pub struct RefreshResponse {
    pub access: String,
}

/// Response for GET /api/auth/me
#[derive(Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub account: LocalAccount,
    /// Providers linked to the account
    pub providers: Vec<String>,
}

pub fn create_session_router(state: AuthAppState) -> Router {
    Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/token/refresh/", post(refresh))
        .with_state(state)
}

/// GET /api/auth/me
async fn me(
    State(state): State<AuthAppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, AppError> {
    let claims = authenticate(&headers, state.controller.sessions())?;
    let store = state.controller.linker().store();

    let account = store
        .get_account(&claims.user_id)
        .map_err(|e| AppError::ServerError(e.to_string()))?
        .ok_or_else(|| {
            warn!(account_id = %claims.user_id, "Session refers to a missing account");
            AppError::Unauthorized("Account no longer exists".to_string())
        })?;

    let providers = store
        .identities_for_account(&account.id)
        .map_err(|e| AppError::ServerError(e.to_string()))?
        .into_iter()
        .map(|identity| identity.provider)
        .collect();

    Ok(Json(MeResponse { account, providers }))
}

/// POST /api/auth/token/refresh/
async fn refresh(
    State(state): State<AuthAppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let access = state
        .controller
        .sessions()
        .refresh_access(&body.refresh)
        .map_err(|e| AppError::from(crate::auth::AuthError::Session(e)))?;

    Ok(Json(RefreshResponse { access }))
}
