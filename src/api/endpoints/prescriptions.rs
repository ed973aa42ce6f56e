//! Prescription endpoints under `/api/medications/prescriptions`.
//!
//! Patients see prescriptions they received, doctors the ones they wrote.
//! Only doctors may write new ones.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::api::endpoints::{body, created, parse_id, JsonBody};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester};
use crate::authorization::Policy;
use crate::prescriptions::{self, PrescriptionChanges, PrescriptionView, SafetyScan};

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<PrescriptionView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(prescriptions::list_prescriptions(&conn, identity)?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<PrescriptionChanges>,
) -> Result<(StatusCode, Json<PrescriptionView>), ApiError> {
    let doctor = requester
        .require(Policy::DoctorOnly)
        .map_err(|e| match e {
            ApiError::Forbidden(_) => ApiError::Forbidden("Only doctors can create prescriptions".into()),
            other => other,
        })?;
    let changes = body(payload)?;
    let conn = ctx.open_db()?;
    let rx = prescriptions::create_prescription(&conn, doctor, changes)?;
    Ok(created(prescriptions::prescription_view(&conn, rx)?))
}

pub async fn retrieve(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<PrescriptionView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Prescription")?;
    let conn = ctx.open_db()?;
    let rx = prescriptions::visible_prescription(&conn, identity, &id)?;
    Ok(Json(prescriptions::prescription_view(&conn, rx)?))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
    payload: JsonBody<PrescriptionChanges>,
) -> Result<Json<PrescriptionView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Prescription")?;
    let conn = ctx.open_db()?;
    let rx = prescriptions::visible_prescription(&conn, identity, &id)?;
    let rx = prescriptions::update_prescription(&conn, rx, body(payload)?)?;
    Ok(Json(prescriptions::prescription_view(&conn, rx)?))
}

pub async fn destroy(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Prescription")?;
    let conn = ctx.open_db()?;
    let rx = prescriptions::visible_prescription(&conn, identity, &id)?;
    prescriptions::delete_prescription(&conn, &rx.id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST .../prescriptions/:id/safety_scan`
pub async fn safety_scan(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<SafetyScan>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Prescription")?;
    let conn = ctx.open_db()?;
    let rx = prescriptions::visible_prescription(&conn, identity, &id)?;
    Ok(Json(prescriptions::safety_scan(&conn, rx)?))
}
