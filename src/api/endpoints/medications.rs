//! Medication tracking endpoints under `/api/medications`.
//!
//! Patient medications, reminders and intake logs are scoped per requester;
//! anything outside the scope is 404. The safety check and adherence report
//! sit alongside them.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;

use crate::api::endpoints::{body, created, parse_id, JsonBody};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester};
use crate::authorization::Policy;
use crate::db::repository::MedicationFilter;
use crate::medications::{
    self, CheckResult, Deactivation, LogView, MedicationChanges, MedicationCheck, NewLog,
    PatientMedicationView, ReminderChanges, ReminderView,
};
use crate::metrics::AdherenceReport;

// ═══════════════════════════════════════════════════════════
// Patient medications
// ═══════════════════════════════════════════════════════════

async fn list_filtered(
    ctx: &ApiContext,
    requester: &Requester,
    filter: MedicationFilter,
) -> Result<Json<Vec<PatientMedicationView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::list_patient_medications(&conn, identity, &filter)?))
}

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<PatientMedicationView>>, ApiError> {
    list_filtered(&ctx, &requester, MedicationFilter::default()).await
}

/// `GET /api/medications/patient-medications/active`
pub async fn active(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<PatientMedicationView>>, ApiError> {
    list_filtered(&ctx, &requester, medications::active_filter()).await
}

/// `GET /api/medications/patient-medications/expired`: end date before today.
pub async fn expired(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<PatientMedicationView>>, ApiError> {
    let today = Utc::now().date_naive();
    list_filtered(&ctx, &requester, medications::expired_filter(today)).await
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<MedicationChanges>,
) -> Result<(StatusCode, Json<PatientMedicationView>), ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let changes = body(payload)?;
    let conn = ctx.open_db()?;
    let med = medications::create_patient_medication(&conn, identity, changes)?;
    Ok(created(medications::medication_view(&conn, med)?))
}

pub async fn retrieve(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<PatientMedicationView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Medication")?;
    let conn = ctx.open_db()?;
    let med = medications::visible_patient_medication(&conn, identity, &id)?;
    Ok(Json(medications::medication_view(&conn, med)?))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
    payload: JsonBody<MedicationChanges>,
) -> Result<Json<PatientMedicationView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Medication")?;
    let conn = ctx.open_db()?;
    let med = medications::editable_patient_medication(&conn, identity, &id)?;
    let med = medications::update_patient_medication(&conn, med, body(payload)?)?;
    Ok(Json(medications::medication_view(&conn, med)?))
}

pub async fn destroy(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Medication")?;
    let conn = ctx.open_db()?;
    let med = medications::editable_patient_medication(&conn, identity, &id)?;
    medications::delete_patient_medication(&conn, &med.id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST .../:id/deactivate`: body `{reason}` is optional.
pub async fn deactivate(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
    payload: Option<Json<Deactivation>>,
) -> Result<Json<PatientMedicationView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Medication")?;
    let reason = payload.map(|Json(d)| d.reason).unwrap_or_default();
    let conn = ctx.open_db()?;
    let med = medications::editable_patient_medication(&conn, identity, &id)?;
    let med = medications::deactivate_patient_medication(&conn, med, &reason)?;
    Ok(Json(medications::medication_view(&conn, med)?))
}

pub async fn refill(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<PatientMedicationView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Medication")?;
    let conn = ctx.open_db()?;
    let med = medications::editable_patient_medication(&conn, identity, &id)?;
    let med = medications::refill_patient_medication(&conn, med)?;
    Ok(Json(medications::medication_view(&conn, med)?))
}

// ═══════════════════════════════════════════════════════════
// Reminders
// ═══════════════════════════════════════════════════════════

pub async fn list_reminders(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<ReminderView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::list_reminders(&conn, identity)?))
}

/// `GET /api/medications/reminders/today`: ordered by time of day.
pub async fn todays_reminders(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<ReminderView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::todays_reminders(&conn, identity, Utc::now())?))
}

pub async fn create_reminder(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<ReminderChanges>,
) -> Result<(StatusCode, Json<ReminderView>), ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let changes = body(payload)?;
    let conn = ctx.open_db()?;
    let reminder = medications::create_reminder(&conn, identity, changes)?;
    Ok(created(medications::reminder_view(&conn, reminder)?))
}

pub async fn retrieve_reminder(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<ReminderView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Reminder")?;
    let conn = ctx.open_db()?;
    let reminder = medications::visible_reminder(&conn, identity, &id)?;
    Ok(Json(medications::reminder_view(&conn, reminder)?))
}

pub async fn update_reminder(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
    payload: JsonBody<ReminderChanges>,
) -> Result<Json<ReminderView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Reminder")?;
    let conn = ctx.open_db()?;
    let reminder = medications::editable_reminder(&conn, identity, &id)?;
    let reminder = medications::update_reminder(&conn, reminder, body(payload)?)?;
    Ok(Json(medications::reminder_view(&conn, reminder)?))
}

pub async fn destroy_reminder(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Reminder")?;
    let conn = ctx.open_db()?;
    let reminder = medications::editable_reminder(&conn, identity, &id)?;
    medications::delete_reminder(&conn, &reminder.id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST .../reminders/:id/trigger`: fires the reminder and logs the dose as taken.
pub async fn trigger_reminder(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<ReminderView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Reminder")?;
    let conn = ctx.open_db()?;
    let reminder = medications::editable_reminder(&conn, identity, &id)?;
    let reminder = medications::trigger_reminder(&conn, identity, reminder)?;
    Ok(Json(medications::reminder_view(&conn, reminder)?))
}

// ═══════════════════════════════════════════════════════════
// Intake logs
// ═══════════════════════════════════════════════════════════

pub async fn list_logs(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<LogView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::list_logs(&conn, identity)?))
}

pub async fn todays_logs(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<LogView>>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::todays_logs(&conn, identity, Utc::now())?))
}

async fn record_log(
    ctx: &ApiContext,
    requester: &Requester,
    payload: JsonBody<NewLog>,
    manual: bool,
) -> Result<(StatusCode, Json<LogView>), ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let new = body(payload)?;
    let conn = ctx.open_db()?;
    let log = medications::create_log(&conn, identity, new, manual)?;
    Ok(created(medications::log_view(&conn, log)?))
}

pub async fn create_log(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<NewLog>,
) -> Result<(StatusCode, Json<LogView>), ApiError> {
    record_log(&ctx, &requester, payload, false).await
}

/// `POST /api/medications/logs/manual`: `actual_time` defaults to now.
pub async fn log_manual(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<NewLog>,
) -> Result<(StatusCode, Json<LogView>), ApiError> {
    record_log(&ctx, &requester, payload, true).await
}

pub async fn retrieve_log(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<LogView>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Medication log")?;
    let conn = ctx.open_db()?;
    let log = medications::visible_log(&conn, identity, &id)?;
    Ok(Json(medications::log_view(&conn, log)?))
}

pub async fn destroy_log(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Medication log")?;
    let conn = ctx.open_db()?;
    let log = medications::editable_log(&conn, identity, &id)?;
    medications::delete_log(&conn, &log.id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════
// Safety check and adherence
// ═══════════════════════════════════════════════════════════

/// `POST /api/medications/check`
pub async fn check(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<MedicationCheck>,
) -> Result<Json<CheckResult>, ApiError> {
    let identity = requester.require(Policy::Authenticated)?;
    let check = body(payload)?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::safety_check(&conn, identity, check)?))
}

/// `GET /api/medications/adherence`: patients only.
pub async fn adherence(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<AdherenceReport>, ApiError> {
    let identity = requester
        .require(Policy::PatientOnly)
        .map_err(|e| match e {
            ApiError::Forbidden(_) => ApiError::Forbidden("Only patients can view adherence data".into()),
            other => other,
        })?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::adherence(&conn, &identity.user_id, Utc::now())?))
}
