//! Bearer token authentication middleware.
//!
//! Reads `Authorization: Bearer <access token>`, verifies it, and injects a
//! `Requester` into request extensions. Requests without credentials pass
//! through anonymously so per-endpoint policies decide; a token that is
//! present but invalid is rejected here with 401.

use axum::http::{header, HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester, SESSION_COOKIE};

/// Establish who is calling. Accesses `ApiContext` from request extensions
/// (injected by the outermost Extension layer).
pub async fn identify(req: Request<axum::body::Body>, next: Next) -> Response {
    match identify_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn identify_inner(mut req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let identity = match bearer_token(req.headers()) {
        Some(token) => Some(ctx.tokens.verify_access(token)?),
        None => None,
    };
    req.extensions_mut().insert(Requester(identity));

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The session token from the `Cookie` header, if any.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}
