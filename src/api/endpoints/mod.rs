//! API endpoint handlers.
//!
//! Each module corresponds to one resource family. Handlers open a
//! connection, apply the endpoint's policy, and delegate to the domain
//! modules.

pub mod auth;
pub mod catalog;
pub mod family;
pub mod health;
pub mod medications;
pub mod prescriptions;
pub mod profiles;
pub mod users;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::api::error::ApiError;

/// JSON request body whose parse failure becomes a structured 400.
pub type JsonBody<T> = Result<Json<T>, JsonRejection>;

pub fn body<T>(payload: JsonBody<T>) -> Result<T, ApiError> {
    Ok(payload?.0)
}

/// Path ids that are not UUIDs cannot name any record.
pub fn parse_id(raw: &str, entity: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("{entity} not found")))
}

pub fn created<T>(value: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(value))
}
