//! Account endpoints.
//!
//! - `GET /api/users`: accounts visible to the requester
//! - `POST /api/users`: registration (open)
//! - `GET /api/users/me`
//! - `POST /api/users/change_password`
//! - `GET|PUT|PATCH|DELETE /api/users/:id`

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::{Extension, Json};
use serde::Serialize;

use crate::accounts::{self, PasswordChange, Registration, UserChanges, UserView};
use crate::api::endpoints::{body, created, parse_id, JsonBody};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester};
use crate::authorization::{owner_or_read_only, Policy};

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(accounts::list_users(&conn, identity)?))
}

/// `POST /api/users`: anyone may register; only admins may create admins.
pub async fn register(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<Registration>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    let registration = body(payload)?;
    let conn = ctx.open_db()?;
    let user = accounts::register(&conn, requester.identity(), registration)?;
    Ok(created(UserView::from(user)))
}

/// `GET /api/users/me`
pub async fn me(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<UserView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    let user = accounts::visible_user(&conn, identity, &identity.user_id)?;
    Ok(Json(user.into()))
}

/// `POST /api/users/change_password`
pub async fn change_password(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<PasswordChange>,
) -> Result<Json<MessageResponse>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let change = body(payload)?;
    let conn = ctx.open_db()?;
    accounts::change_password(&conn, identity, change)?;
    Ok(Json(MessageResponse {
        message: "Password updated successfully",
    }))
}

pub async fn retrieve(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<UserView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "User")?;
    let conn = ctx.open_db()?;
    Ok(Json(accounts::visible_user(&conn, identity, &id)?.into()))
}

/// `PUT|PATCH /api/users/:id`: owners only.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    method: Method,
    Path(id): Path<String>,
    payload: JsonBody<UserChanges>,
) -> Result<Json<UserView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "User")?;
    let conn = ctx.open_db()?;
    let user = accounts::visible_user(&conn, identity, &id)?;
    owner_or_read_only(Some(identity), &method, &user.id).into_result()?;
    let changes = body(payload)?;
    Ok(Json(accounts::update_user(&conn, user, changes)?.into()))
}

/// `DELETE /api/users/:id`: admins only.
pub async fn destroy(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::AdminOnly)?;
    let id = parse_id(&id, "User")?;
    let conn = ctx.open_db()?;
    let user = accounts::visible_user(&conn, identity, &id)?;
    accounts::delete_user(&conn, &user.id)?;
    Ok(StatusCode::NO_CONTENT)
}
