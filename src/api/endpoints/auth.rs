//! Token endpoints.
//!
//! - `POST /api/token`: username/password for an access + refresh pair
//! - `POST /api/token/refresh`: refresh token for a new access token
//! - `POST /api/logout`: blacklist the presented refresh token

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::endpoints::{body, JsonBody};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester};
use crate::auth::{self, Identity, TokenPair};
use crate::authorization::Policy;

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

#[derive(Serialize)]
pub struct AccessResponse {
    pub access: String,
}

/// `POST /api/token`: log in.
pub async fn token(
    State(ctx): State<ApiContext>,
    payload: JsonBody<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let login = body(payload)?;
    let conn = ctx.open_db()?;
    let user = auth::authenticate(&conn, &login.username, &login.password)?;
    let pair = ctx.tokens.issue_pair(&Identity::from(&user))?;
    tracing::info!(user_id = %user.id, "token pair issued");
    Ok(Json(pair))
}

/// `POST /api/token/refresh`: new access token.
pub async fn refresh(
    State(ctx): State<ApiContext>,
    payload: JsonBody<RefreshRequest>,
) -> Result<Json<AccessResponse>, ApiError> {
    let token = body(payload)?
        .refresh
        .ok_or_else(|| ApiError::BadRequest("Refresh token is required".into()))?;
    let conn = ctx.open_db()?;
    let access = ctx.tokens.refresh(&conn, &token)?;
    Ok(Json(AccessResponse { access }))
}

/// `POST /api/logout`: 205 once the refresh token is blacklisted.
/// A missing or unusable token is the caller's mistake (400), not a 401.
pub async fn logout(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let token = body(payload)?
        .refresh
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Refresh token is required".into()))?;
    let conn = ctx.open_db()?;
    ctx.tokens
        .revoke(&conn, identity, token.trim())
        .map_err(|e| match e {
            auth::AuthError::Database(db) => ApiError::from(db),
            other => ApiError::BadRequest(other.to_string()),
        })?;
    Ok(StatusCode::RESET_CONTENT)
}
