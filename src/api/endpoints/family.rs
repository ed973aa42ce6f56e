//! Family contact endpoints, patients only: `/api/family-members`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::api::endpoints::{body, created, parse_id, JsonBody};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester};
use crate::authorization::Policy;
use crate::family::{self, FamilyMemberChanges};
use crate::models::FamilyMember;

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<FamilyMember>>, ApiError> {
    let identity = requester.require(Policy::PatientOnly)?;
    let conn = ctx.open_db()?;
    Ok(Json(family::list_family_members(&conn, identity)?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<FamilyMemberChanges>,
) -> Result<(StatusCode, Json<FamilyMember>), ApiError> {
    let identity = requester.require(Policy::PatientOnly)?;
    let changes = body(payload)?;
    let conn = ctx.open_db()?;
    Ok(created(family::create_family_member(&conn, identity, changes)?))
}

pub async fn retrieve(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<FamilyMember>, ApiError> {
    let identity = requester.require(Policy::PatientOnly)?;
    let id = parse_id(&id, "Family member")?;
    let conn = ctx.open_db()?;
    Ok(Json(family::visible_family_member(&conn, identity, &id)?))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
    payload: JsonBody<FamilyMemberChanges>,
) -> Result<Json<FamilyMember>, ApiError> {
    let identity = requester.require(Policy::PatientOnly)?;
    let id = parse_id(&id, "Family member")?;
    let conn = ctx.open_db()?;
    let member = family::visible_family_member(&conn, identity, &id)?;
    Ok(Json(family::update_family_member(&conn, identity, member, body(payload)?)?))
}

pub async fn destroy(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::PatientOnly)?;
    let id = parse_id(&id, "Family member")?;
    let conn = ctx.open_db()?;
    let member = family::visible_family_member(&conn, identity, &id)?;
    family::delete_family_member(&conn, &member.id)?;
    Ok(StatusCode::NO_CONTENT)
}
