//! Role profile endpoints: `/api/patients`, `/api/doctors`, `/api/health`.
//!
//! Lookups go through the requester's scope, so a record outside it is 404.
//! Writes additionally need the requester to own the profile.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::{Extension, Json};

use crate::api::endpoints::{body, created, parse_id, JsonBody};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester};
use crate::authorization::{owner_or_read_only, Policy, PROFILE_ACCESS};
use crate::profiles::{
    self, DoctorProfileChanges, DoctorProfileView, HealthProfileChanges, HealthProfileView,
    PatientProfileChanges, PatientProfileView,
};

// ═══════════════════════════════════════════════════════════
// Patient profiles
// ═══════════════════════════════════════════════════════════

pub async fn list_patients(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<PatientProfileView>>, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let conn = ctx.open_db()?;
    Ok(Json(profiles::list_patient_profiles(&conn, identity)?))
}

pub async fn create_patient(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<PatientProfileChanges>,
) -> Result<(StatusCode, Json<PatientProfileView>), ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let changes = body(payload)?;
    let conn = ctx.open_db()?;
    let profile = profiles::create_patient_profile(&conn, identity, changes)?;
    Ok(created(profiles::patient_view(&conn, profile)?))
}

pub async fn retrieve_patient(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<PatientProfileView>, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let id = parse_id(&id, "Patient profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_patient_profile(&conn, identity, &id)?;
    Ok(Json(profiles::patient_view(&conn, profile)?))
}

pub async fn update_patient(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    method: Method,
    Path(id): Path<String>,
    payload: JsonBody<PatientProfileChanges>,
) -> Result<Json<PatientProfileView>, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let id = parse_id(&id, "Patient profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_patient_profile(&conn, identity, &id)?;
    owner_or_read_only(Some(identity), &method, &profile.user_id).into_result()?;
    let profile = profiles::update_patient_profile(&conn, profile, body(payload)?)?;
    Ok(Json(profiles::patient_view(&conn, profile)?))
}

pub async fn destroy_patient(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    method: Method,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let id = parse_id(&id, "Patient profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_patient_profile(&conn, identity, &id)?;
    owner_or_read_only(Some(identity), &method, &profile.user_id).into_result()?;
    profiles::delete_patient_profile(&conn, &profile.id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════
// Doctor profiles
// ═══════════════════════════════════════════════════════════

pub async fn list_doctors(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<DoctorProfileView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(profiles::list_doctor_profiles(&conn, identity)?))
}

pub async fn create_doctor(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<DoctorProfileChanges>,
) -> Result<(StatusCode, Json<DoctorProfileView>), ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let changes = body(payload)?;
    let conn = ctx.open_db()?;
    let profile = profiles::create_doctor_profile(&conn, identity, changes)?;
    Ok(created(profiles::doctor_view(&conn, profile)?))
}

pub async fn retrieve_doctor(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<DoctorProfileView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Doctor profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_doctor_profile(&conn, identity, &id)?;
    Ok(Json(profiles::doctor_view(&conn, profile)?))
}

pub async fn update_doctor(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    method: Method,
    Path(id): Path<String>,
    payload: JsonBody<DoctorProfileChanges>,
) -> Result<Json<DoctorProfileView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Doctor profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_doctor_profile(&conn, identity, &id)?;
    owner_or_read_only(Some(identity), &method, &profile.user_id).into_result()?;
    let profile = profiles::update_doctor_profile(&conn, profile, body(payload)?)?;
    Ok(Json(profiles::doctor_view(&conn, profile)?))
}

pub async fn destroy_doctor(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    method: Method,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Doctor profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_doctor_profile(&conn, identity, &id)?;
    owner_or_read_only(Some(identity), &method, &profile.user_id).into_result()?;
    profiles::delete_doctor_profile(&conn, &profile.id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════
// Health profiles
// ═══════════════════════════════════════════════════════════

pub async fn list_health(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<HealthProfileView>>, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let conn = ctx.open_db()?;
    Ok(Json(profiles::list_health_profiles(&conn, identity)?))
}

pub async fn create_health(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<HealthProfileChanges>,
) -> Result<(StatusCode, Json<HealthProfileView>), ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let changes = body(payload)?;
    let conn = ctx.open_db()?;
    let profile = profiles::create_health_profile(&conn, identity, changes)?;
    Ok(created(profiles::health_view(&conn, profile)?))
}

/// `GET /api/health/summary`: the requester's own profile with BMI and completion.
pub async fn health_summary(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<HealthProfileView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(profiles::health_summary(&conn, identity)?))
}

pub async fn retrieve_health(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<HealthProfileView>, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let id = parse_id(&id, "Health profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_health_profile(&conn, identity, &id)?;
    Ok(Json(profiles::health_view(&conn, profile)?))
}

pub async fn update_health(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    method: Method,
    Path(id): Path<String>,
    payload: JsonBody<HealthProfileChanges>,
) -> Result<Json<HealthProfileView>, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let id = parse_id(&id, "Health profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_health_profile(&conn, identity, &id)?;
    owner_or_read_only(Some(identity), &method, &profile.user_id).into_result()?;
    let profile = profiles::update_health_profile(&conn, profile, body(payload)?)?;
    Ok(Json(profiles::health_view(&conn, profile)?))
}

pub async fn destroy_health(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    method: Method,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(PROFILE_ACCESS)?;
    let id = parse_id(&id, "Health profile")?;
    let conn = ctx.open_db()?;
    let profile = profiles::visible_health_profile(&conn, identity, &id)?;
    owner_or_read_only(Some(identity), &method, &profile.user_id).into_result()?;
    profiles::delete_health_profile(&conn, &profile.id)?;
    Ok(StatusCode::NO_CONTENT)
}
