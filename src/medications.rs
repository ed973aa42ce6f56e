//! Medication tracking: patient medications, reminders, intake logs,
//! adherence, the catalog and the drug-interaction table.
//!
//! Object lookups go through the requester's scope first; a record outside
//! it is reported as not found. Changing a visible record also needs the
//! write scope, else 403. Multi-row writes run in one transaction.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::repository::{self, MedicationFilter};
use crate::db::DatabaseError;
use crate::lifecycle::{apply_expiry, create_default_reminders, deactivate_medication, EVERY_DAY};
use crate::metrics::{
    adherence_rate, adherence_report, is_expired, medication_adherence, next_trigger_after,
    pairwise_interactions, AdherenceReport, InteractionHit,
};
use crate::models::enums::{Frequency, InteractionSeverity, LogStatus, NotificationType};
use crate::models::{DrugInteraction, Medication, MedicationLog, MedicationReminder, PatientMedication};
use crate::scoping;
use crate::validation::{nullable, or_not_found, require, DomainError, FieldErrors};

pub const MAX_NAME_LEN: usize = 200;
pub const REMINDER_CONFIRMATION: &str = "reminder";
pub const MANUAL_CONFIRMATION: &str = "manual";

// ═══════════════════════════════════════════
// View types
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct PatientMedicationView {
    #[serde(flatten)]
    pub medication: PatientMedication,
    pub patient_name: String,
    pub is_expired: bool,
    pub adherence_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderView {
    #[serde(flatten)]
    pub reminder: MedicationReminder,
    pub medication_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogView {
    #[serde(flatten)]
    pub log: MedicationLog,
    pub medication_name: String,
    pub patient_name: String,
}

fn patient_name(conn: &Connection, patient_id: &Uuid) -> Result<String, DatabaseError> {
    Ok(repository::get_user(conn, patient_id)?
        .map(|u| u.display_name())
        .unwrap_or_default())
}

pub fn medication_view(conn: &Connection, med: PatientMedication) -> Result<PatientMedicationView, DomainError> {
    let logs = repository::list_logs_for_medication(conn, &med.id)?;
    Ok(PatientMedicationView {
        patient_name: patient_name(conn, &med.patient_id)?,
        is_expired: is_expired(med.end_date, Utc::now().date_naive()),
        adherence_rate: adherence_rate(&logs),
        medication: med,
    })
}

pub fn reminder_view(conn: &Connection, reminder: MedicationReminder) -> Result<ReminderView, DomainError> {
    let medication_name = repository::get_patient_medication(conn, &reminder.medication_id)?
        .map(|m| m.name)
        .unwrap_or_default();
    Ok(ReminderView { reminder, medication_name })
}

pub fn log_view(conn: &Connection, log: MedicationLog) -> Result<LogView, DomainError> {
    let (medication_name, patient_name) = match repository::get_patient_medication(conn, &log.medication_id)? {
        Some(med) => (med.name, patient_name(conn, &med.patient_id)?),
        None => (String::new(), String::new()),
    };
    Ok(LogView { log, medication_name, patient_name })
}

// ═══════════════════════════════════════════
// Patient medications
// ═══════════════════════════════════════════

/// Create and update body. Creation needs `name`, `dosage` and `frequency`;
/// `start_date` defaults to today.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MedicationChanges {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub frequency: Option<Frequency>,
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<NaiveDate>>,
    pub instructions: Option<String>,
    pub prescribing_doctor: Option<String>,
    pub pharmacy: Option<String>,
    pub is_active: Option<bool>,
    pub reason_for_discontinuation: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub total_quantity: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub remaining_quantity: Option<Option<u32>>,
    pub refills_remaining: Option<u32>,
}

impl MedicationChanges {
    fn apply(self, med: &mut PatientMedication) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();
        if let Some(name) = self.name {
            let name = name.trim().to_string();
            require(&name, "name", &mut errors);
            med.name = name;
        }
        if let Some(dosage) = self.dosage {
            let dosage = dosage.trim().to_string();
            require(&dosage, "dosage", &mut errors);
            med.dosage = dosage;
        }
        if let Some(v) = self.frequency {
            med.frequency = v;
        }
        if let Some(v) = self.start_date {
            med.start_date = v;
        }
        if let Some(v) = self.end_date {
            med.end_date = v;
        }
        if let Some(v) = self.instructions {
            med.instructions = v;
        }
        if let Some(v) = self.prescribing_doctor {
            med.prescribing_doctor = v;
        }
        if let Some(v) = self.pharmacy {
            med.pharmacy = v;
        }
        if let Some(v) = self.is_active {
            med.is_active = v;
        }
        if let Some(v) = self.reason_for_discontinuation {
            med.reason_for_discontinuation = v;
        }
        if let Some(v) = self.total_quantity {
            med.total_quantity = v;
        }
        if let Some(v) = self.remaining_quantity {
            med.remaining_quantity = v;
        }
        if let Some(v) = self.refills_remaining {
            med.refills_remaining = v;
        }

        // Checked on the merged record so partial updates are validated too.
        if med.end_date.is_some_and(|end| end < med.start_date) {
            errors.add("end_date", "End date must be after start date.");
        }
        if let (Some(remaining), Some(total)) = (med.remaining_quantity, med.total_quantity) {
            if remaining > total {
                errors.add("remaining_quantity", "Remaining quantity cannot exceed total quantity.");
            }
        }
        errors.into_result()?;
        med.updated_at = Utc::now();
        Ok(())
    }
}

pub fn list_patient_medications(
    conn: &Connection,
    identity: &Identity,
    filter: &MedicationFilter,
) -> Result<Vec<PatientMedicationView>, DomainError> {
    let scope = scoping::patient_medications(conn, identity)?;
    repository::list_patient_medications(conn, &scope, filter)?
        .into_iter()
        .map(|m| medication_view(conn, m))
        .collect()
}

pub fn active_filter() -> MedicationFilter {
    MedicationFilter {
        is_active: Some(true),
        ..Default::default()
    }
}

pub fn expired_filter(today: NaiveDate) -> MedicationFilter {
    MedicationFilter {
        ended_before: Some(today),
        ..Default::default()
    }
}

pub fn visible_patient_medication(
    conn: &Connection,
    identity: &Identity,
    id: &Uuid,
) -> Result<PatientMedication, DomainError> {
    let scope = scoping::patient_medications(conn, identity)?;
    repository::get_patient_medication(conn, id)?
        .filter(|m| scope.admits(&m.patient_id, m.is_active))
        .ok_or(DomainError::NotFound("Medication"))
}

/// Visible records the requester may only read are forbidden, not hidden.
fn ensure_writable(conn: &Connection, identity: &Identity, patient_id: &Uuid) -> Result<(), DomainError> {
    if scoping::medication_writers(conn, identity)?.contains(patient_id) {
        Ok(())
    } else {
        Err(DomainError::Forbidden(
            "You do not have permission to modify this patient's medications.".into(),
        ))
    }
}

fn owning_patient(conn: &Connection, medication_id: &Uuid, entity: &'static str) -> Result<Uuid, DomainError> {
    repository::get_patient_medication(conn, medication_id)?
        .map(|m| m.patient_id)
        .ok_or(DomainError::NotFound(entity))
}

pub fn editable_patient_medication(
    conn: &Connection,
    identity: &Identity,
    id: &Uuid,
) -> Result<PatientMedication, DomainError> {
    let med = visible_patient_medication(conn, identity, id)?;
    ensure_writable(conn, identity, &med.patient_id)?;
    Ok(med)
}

/// Records a medication for the requester together with the reminders its
/// frequency implies. A medication that is already past its end date is
/// stored deactivated.
pub fn create_patient_medication(
    conn: &Connection,
    identity: &Identity,
    changes: MedicationChanges,
) -> Result<PatientMedication, DomainError> {
    let mut errors = FieldErrors::new();
    for (present, field) in [
        (changes.name.is_some(), "name"),
        (changes.dosage.is_some(), "dosage"),
        (changes.frequency.is_some(), "frequency"),
    ] {
        if !present {
            errors.add(field, "This field is required.");
        }
    }
    errors.into_result()?;

    let now = Utc::now();
    let mut med = PatientMedication {
        id: Uuid::new_v4(),
        patient_id: identity.user_id,
        name: String::new(),
        dosage: String::new(),
        frequency: Frequency::OnceDaily,
        start_date: now.date_naive(),
        end_date: None,
        instructions: String::new(),
        prescribing_doctor: String::new(),
        pharmacy: String::new(),
        is_active: true,
        reason_for_discontinuation: String::new(),
        total_quantity: None,
        remaining_quantity: None,
        refills_remaining: 0,
        safety_checked: false,
        safety_warnings: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    changes.apply(&mut med)?;

    let tx = conn.unchecked_transaction()?;
    repository::insert_patient_medication(&tx, &med)?;
    let reminders = create_default_reminders(&tx, &med)?;
    apply_expiry(&tx, &mut med, now.date_naive())?;
    tx.commit()?;

    tracing::info!(medication_id = %med.id, patient_id = %med.patient_id, reminders, "medication recorded");
    Ok(med)
}

pub fn update_patient_medication(
    conn: &Connection,
    mut med: PatientMedication,
    changes: MedicationChanges,
) -> Result<PatientMedication, DomainError> {
    changes.apply(&mut med)?;
    let tx = conn.unchecked_transaction()?;
    repository::update_patient_medication(&tx, &med)?;
    apply_expiry(&tx, &mut med, Utc::now().date_naive())?;
    tx.commit()?;
    Ok(med)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Deactivation {
    #[serde(default)]
    pub reason: String,
}

/// Switches the medication and all of its reminders off.
pub fn deactivate_patient_medication(
    conn: &Connection,
    mut med: PatientMedication,
    reason: &str,
) -> Result<PatientMedication, DomainError> {
    let tx = conn.unchecked_transaction()?;
    deactivate_medication(&tx, &med.id, reason)?;
    tx.commit()?;
    med.is_active = false;
    med.reason_for_discontinuation = reason.to_string();
    Ok(med)
}

/// Restores the remaining quantity to the full pack and uses up one refill.
/// Medications without tracked quantities are returned unchanged.
pub fn refill_patient_medication(
    conn: &Connection,
    mut med: PatientMedication,
) -> Result<PatientMedication, DomainError> {
    let Some(total) = med.total_quantity.filter(|t| *t > 0) else {
        return Ok(med);
    };
    if med.remaining_quantity.is_none() {
        return Ok(med);
    }
    med.remaining_quantity = Some(total);
    med.refills_remaining = med.refills_remaining.saturating_sub(1);
    med.updated_at = Utc::now();
    repository::update_patient_medication(conn, &med)?;
    tracing::info!(medication_id = %med.id, refills_remaining = med.refills_remaining, "medication refilled");
    Ok(med)
}

pub fn delete_patient_medication(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_patient_medication(conn, id).map_err(or_not_found("Medication"))
}

// ═══════════════════════════════════════════
// Reminders
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReminderChanges {
    pub medication_id: Option<Uuid>,
    pub reminder_time: Option<NaiveTime>,
    pub days_of_week: Option<Vec<u8>>,
    pub notification_type: Option<NotificationType>,
    pub is_active: Option<bool>,
}

/// Days are 0 (Monday) through 6 (Sunday), at least one, no repeats.
pub fn check_days(days: &[u8], errors: &mut FieldErrors) {
    if days.is_empty() {
        errors.add("days_of_week", "Select at least one day.");
    }
    if days.iter().any(|d| *d > 6) {
        errors.add("days_of_week", "Days must be between 0 (Monday) and 6 (Sunday).");
    }
    let mut seen = [false; 7];
    for day in days.iter().filter(|d| **d <= 6) {
        if std::mem::replace(&mut seen[*day as usize], true) {
            errors.add("days_of_week", "Days must not repeat.");
            break;
        }
    }
}

pub fn list_reminders(conn: &Connection, identity: &Identity) -> Result<Vec<ReminderView>, DomainError> {
    let scope = scoping::reminders(conn, identity)?;
    repository::list_reminders(conn, &scope)?
        .into_iter()
        .map(|r| reminder_view(conn, r))
        .collect()
}

/// Reminders that fire on `now`'s weekday, earliest first.
pub fn todays_reminders(conn: &Connection, identity: &Identity, now: DateTime<Utc>) -> Result<Vec<ReminderView>, DomainError> {
    let weekday = now.weekday().num_days_from_monday() as u8;
    let scope = scoping::reminders(conn, identity)?;
    repository::list_reminders(conn, &scope)?
        .into_iter()
        .filter(|r| r.days_of_week.contains(&weekday))
        .map(|r| reminder_view(conn, r))
        .collect()
}

pub fn visible_reminder(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<MedicationReminder, DomainError> {
    let scope = scoping::reminders(conn, identity)?;
    let Some(reminder) = repository::get_reminder(conn, id)? else {
        return Err(DomainError::NotFound("Reminder"));
    };
    let visible = repository::get_patient_medication(conn, &reminder.medication_id)?
        .is_some_and(|m| scope.admits(&m.patient_id, reminder.is_active));
    if !visible {
        return Err(DomainError::NotFound("Reminder"));
    }
    Ok(reminder)
}

pub fn editable_reminder(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<MedicationReminder, DomainError> {
    let reminder = visible_reminder(conn, identity, id)?;
    let patient_id = owning_patient(conn, &reminder.medication_id, "Reminder")?;
    ensure_writable(conn, identity, &patient_id)?;
    Ok(reminder)
}

pub fn create_reminder(
    conn: &Connection,
    identity: &Identity,
    changes: ReminderChanges,
) -> Result<MedicationReminder, DomainError> {
    let mut errors = FieldErrors::new();
    let scope = scoping::reminders(conn, identity)?;
    let medication = match changes.medication_id {
        None => {
            errors.add("medication_id", "This field is required.");
            None
        }
        Some(id) => {
            let med = repository::get_patient_medication(conn, &id)?.filter(|m| scope.patients.contains(&m.patient_id));
            match &med {
                Some(m) => ensure_writable(conn, identity, &m.patient_id)?,
                None => errors.add("medication_id", "Medication does not exist."),
            }
            med
        }
    };
    if changes.reminder_time.is_none() {
        errors.add("reminder_time", "This field is required.");
    }
    let days = changes.days_of_week.unwrap_or_else(|| EVERY_DAY.to_vec());
    check_days(&days, &mut errors);
    errors.into_result()?;

    let (Some(medication), Some(time)) = (medication, changes.reminder_time) else {
        return Err(DomainError::field("reminder_time", "This field is required."));
    };
    let now = Utc::now();
    let reminder = MedicationReminder {
        id: Uuid::new_v4(),
        medication_id: medication.id,
        reminder_time: time,
        next_trigger: next_trigger_after(now, time, &days),
        days_of_week: days,
        notification_type: changes.notification_type.unwrap_or(NotificationType::Push),
        is_active: changes.is_active.unwrap_or(true),
        last_triggered: None,
        created_at: now,
        updated_at: now,
    };
    repository::insert_reminder(conn, &reminder)?;
    Ok(reminder)
}

pub fn update_reminder(
    conn: &Connection,
    mut reminder: MedicationReminder,
    changes: ReminderChanges,
) -> Result<MedicationReminder, DomainError> {
    let mut errors = FieldErrors::new();
    if let Some(days) = changes.days_of_week {
        check_days(&days, &mut errors);
        reminder.days_of_week = days;
    }
    errors.into_result()?;

    if let Some(v) = changes.reminder_time {
        reminder.reminder_time = v;
    }
    if let Some(v) = changes.notification_type {
        reminder.notification_type = v;
    }
    if let Some(v) = changes.is_active {
        reminder.is_active = v;
    }
    let now = Utc::now();
    reminder.next_trigger = next_trigger_after(now, reminder.reminder_time, &reminder.days_of_week);
    reminder.updated_at = now;
    repository::update_reminder(conn, &reminder)?;
    Ok(reminder)
}

/// Marks the reminder fired and records the dose as taken, confirmed by
/// the requester.
pub fn trigger_reminder(
    conn: &Connection,
    identity: &Identity,
    mut reminder: MedicationReminder,
) -> Result<MedicationReminder, DomainError> {
    let medication = repository::get_patient_medication(conn, &reminder.medication_id)?
        .ok_or(DomainError::NotFound("Medication"))?;
    let now = Utc::now();
    let next = next_trigger_after(now, reminder.reminder_time, &reminder.days_of_week);

    let log = MedicationLog {
        id: Uuid::new_v4(),
        medication_id: medication.id,
        reminder_id: Some(reminder.id),
        scheduled_time: now,
        actual_time: Some(now),
        status: LogStatus::Taken,
        dosage_taken: medication.dosage,
        notes: String::new(),
        confirmed_by: Some(identity.user_id),
        confirmation_method: REMINDER_CONFIRMATION.to_string(),
        created_at: now,
    };

    let tx = conn.unchecked_transaction()?;
    repository::record_trigger(&tx, &reminder.id, &now, next.as_ref())?;
    repository::insert_log(&tx, &log)?;
    tx.commit()?;

    tracing::info!(reminder_id = %reminder.id, log_id = %log.id, "reminder triggered");
    reminder.last_triggered = Some(now);
    reminder.next_trigger = next;
    reminder.updated_at = now;
    Ok(reminder)
}

pub fn delete_reminder(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_reminder(conn, id).map_err(or_not_found("Reminder"))
}

// ═══════════════════════════════════════════
// Intake logs
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLog {
    pub medication_id: Option<Uuid>,
    pub reminder_id: Option<Uuid>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub actual_time: Option<DateTime<Utc>>,
    pub status: Option<LogStatus>,
    #[serde(default)]
    pub dosage_taken: String,
    #[serde(default)]
    pub notes: String,
    pub confirmation_method: Option<String>,
}

fn day_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

pub fn list_logs(conn: &Connection, identity: &Identity) -> Result<Vec<LogView>, DomainError> {
    let scope = scoping::medication_logs(conn, identity)?;
    repository::list_logs(conn, &scope, None)?
        .into_iter()
        .map(|l| log_view(conn, l))
        .collect()
}

/// Logs scheduled on `now`'s calendar day (UTC).
pub fn todays_logs(conn: &Connection, identity: &Identity, now: DateTime<Utc>) -> Result<Vec<LogView>, DomainError> {
    let scope = scoping::medication_logs(conn, identity)?;
    repository::list_logs(conn, &scope, Some(day_window(now)))?
        .into_iter()
        .map(|l| log_view(conn, l))
        .collect()
}

pub fn visible_log(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<MedicationLog, DomainError> {
    let scope = scoping::medication_logs(conn, identity)?;
    let Some(log) = repository::get_log(conn, id)? else {
        return Err(DomainError::NotFound("Medication log"));
    };
    let visible = repository::get_patient_medication(conn, &log.medication_id)?
        .is_some_and(|m| scope.contains(&m.patient_id));
    if !visible {
        return Err(DomainError::NotFound("Medication log"));
    }
    Ok(log)
}

pub fn editable_log(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<MedicationLog, DomainError> {
    let log = visible_log(conn, identity, id)?;
    let patient_id = owning_patient(conn, &log.medication_id, "Medication log")?;
    ensure_writable(conn, identity, &patient_id)?;
    Ok(log)
}

/// Records an intake event. Manual entries default `actual_time` to now
/// and are confirmed by the requester.
pub fn create_log(conn: &Connection, identity: &Identity, new: NewLog, manual: bool) -> Result<MedicationLog, DomainError> {
    let now = Utc::now();
    let mut errors = FieldErrors::new();
    let scope = scoping::medication_logs(conn, identity)?;

    let medication = match new.medication_id {
        None => {
            errors.add("medication_id", "This field is required.");
            None
        }
        Some(id) => {
            let med = repository::get_patient_medication(conn, &id)?.filter(|m| scope.contains(&m.patient_id));
            match &med {
                Some(m) => ensure_writable(conn, identity, &m.patient_id)?,
                None => errors.add("medication_id", "Medication does not exist."),
            }
            med
        }
    };
    if let (Some(reminder_id), Some(med)) = (new.reminder_id, medication.as_ref()) {
        let belongs = repository::get_reminder(conn, &reminder_id)?.is_some_and(|r| r.medication_id == med.id);
        if !belongs {
            errors.add("reminder_id", "Reminder does not belong to this medication.");
        }
    }

    let actual_time = match new.actual_time {
        None if manual => Some(now),
        other => other,
    };
    if actual_time.is_some_and(|t| t > now) {
        errors.add("actual_time", "Actual time cannot be in the future.");
    }
    let scheduled_time = new.scheduled_time.unwrap_or(now);
    if scheduled_time > now {
        errors.add("scheduled_time", "Scheduled time cannot be in the future for new logs.");
    }
    errors.into_result()?;

    let Some(medication) = medication else {
        return Err(DomainError::field("medication_id", "Medication does not exist."));
    };
    let log = MedicationLog {
        id: Uuid::new_v4(),
        medication_id: medication.id,
        reminder_id: new.reminder_id,
        scheduled_time,
        actual_time,
        status: new.status.unwrap_or(LogStatus::Taken),
        dosage_taken: new.dosage_taken,
        notes: new.notes,
        confirmed_by: manual.then_some(identity.user_id),
        confirmation_method: new
            .confirmation_method
            .unwrap_or_else(|| MANUAL_CONFIRMATION.to_string()),
        created_at: now,
    };
    repository::insert_log(conn, &log)?;
    Ok(log)
}

pub fn delete_log(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_log(conn, id).map_err(or_not_found("Medication log"))
}

// ═══════════════════════════════════════════
// Adherence
// ═══════════════════════════════════════════

/// Adherence over the patient's active medications plus the trailing week.
pub fn adherence(conn: &Connection, patient_id: &Uuid, now: DateTime<Utc>) -> Result<AdherenceReport, DomainError> {
    let mut per_medication = Vec::new();
    for med in repository::list_active_medications_for_patient(conn, patient_id)? {
        let logs = repository::list_logs_for_medication(conn, &med.id)?;
        per_medication.push(medication_adherence(&med, &logs));
    }
    let weekly = repository::list_logs_for_patient_since(conn, patient_id, &(now - Duration::days(7)))?;
    Ok(adherence_report(per_medication, &weekly))
}

// ═══════════════════════════════════════════
// Safety check
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct MedicationCheck {
    pub medications: Vec<String>,
    pub patient_id: Option<Uuid>,
    #[serde(default)]
    pub existing_conditions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckWarning {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub medication: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub medications_checked: Vec<String>,
    pub interactions: Vec<InteractionHit>,
    pub warnings: Vec<CheckWarning>,
    pub timestamp: DateTime<Utc>,
}

fn check_names(names: &[String], field: &str, errors: &mut FieldErrors) {
    if names.is_empty() {
        errors.add(field, "Provide at least one medication.");
    }
    if names.iter().any(|n| n.trim().is_empty()) {
        errors.add(field, "Medication names may not be blank.");
    }
    if names.iter().any(|n| n.chars().count() > MAX_NAME_LEN) {
        errors.add(field, format!("Ensure each name has no more than {MAX_NAME_LEN} characters."));
    }
}

/// Pairwise interactions among the proposed medications, plus a duplicate
/// warning for each one the patient already takes.
pub fn safety_check(conn: &Connection, identity: &Identity, check: MedicationCheck) -> Result<CheckResult, DomainError> {
    let mut errors = FieldErrors::new();
    check_names(&check.medications, "medications", &mut errors);
    errors.into_result()?;

    let run = || -> Result<CheckResult, DomainError> {
        let table = repository::list_interactions(conn)?;
        let interactions = pairwise_interactions(&check.medications, &table);

        let mut warnings = Vec::new();
        if let Some(patient_id) = check.patient_id {
            let scope = scoping::patient_medications(conn, identity)?;
            if !scope.patients.contains(&patient_id) {
                return Err(DomainError::NotFound("Patient"));
            }
            let current: Vec<String> = repository::list_active_medications_for_patient(conn, &patient_id)?
                .into_iter()
                .map(|m| m.name.trim().to_lowercase())
                .collect();
            for name in &check.medications {
                if current.contains(&name.trim().to_lowercase()) {
                    warnings.push(CheckWarning {
                        kind: "duplicate",
                        medication: name.clone(),
                        message: format!("Patient is already taking {name}"),
                    });
                }
            }
        }

        Ok(CheckResult {
            medications_checked: check.medications.clone(),
            interactions,
            warnings,
            timestamp: Utc::now(),
        })
    };

    run().map_err(|err| match err {
        DomainError::Database(e) => {
            tracing::error!(error = %e, "medication check failed");
            DomainError::Internal("Failed to perform medication check")
        }
        other => other,
    })
}

// ═══════════════════════════════════════════
// Catalog and interaction table
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct NewCatalogMedication {
    pub name: String,
    pub generic_name: Option<String>,
    pub brand_name: Option<String>,
    #[serde(default)]
    pub dosage_form: String,
    #[serde(default)]
    pub strength: String,
    pub drug_class: Option<String>,
    pub atc_code: Option<String>,
    pub pregnancy_category: Option<String>,
    #[serde(default)]
    pub controlled_substance: bool,
    #[serde(default = "default_true")]
    pub requires_prescription: bool,
}

fn default_true() -> bool {
    true
}

pub fn search_catalog(conn: &Connection, search: Option<&str>) -> Result<Vec<Medication>, DomainError> {
    Ok(repository::search_catalog(conn, search)?)
}

pub fn create_catalog_medication(conn: &Connection, new: NewCatalogMedication) -> Result<Medication, DomainError> {
    let mut errors = FieldErrors::new();
    let name = new.name.trim().to_string();
    require(&name, "name", &mut errors);
    errors.into_result()?;

    let now = Utc::now();
    let med = Medication {
        id: Uuid::new_v4(),
        name,
        generic_name: new.generic_name,
        brand_name: new.brand_name,
        dosage_form: new.dosage_form,
        strength: new.strength,
        drug_class: new.drug_class,
        atc_code: new.atc_code,
        pregnancy_category: new.pregnancy_category,
        controlled_substance: new.controlled_substance,
        requires_prescription: new.requires_prescription,
        created_at: now,
        updated_at: now,
    };
    repository::insert_catalog_medication(conn, &med)?;
    Ok(med)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInteraction {
    pub medication_1: String,
    pub medication_2: String,
    pub severity: InteractionSeverity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mechanism: String,
    #[serde(default)]
    pub recommendation: String,
}

pub fn list_interactions(conn: &Connection) -> Result<Vec<DrugInteraction>, DomainError> {
    Ok(repository::list_interactions(conn)?)
}

pub fn get_interaction(conn: &Connection, id: &Uuid) -> Result<DrugInteraction, DomainError> {
    repository::get_interaction(conn, id)?.ok_or(DomainError::NotFound("Drug interaction"))
}

pub fn create_interaction(conn: &Connection, new: NewInteraction) -> Result<DrugInteraction, DomainError> {
    let mut errors = FieldErrors::new();
    let (a, b) = (new.medication_1.trim().to_string(), new.medication_2.trim().to_string());
    require(&a, "medication_1", &mut errors);
    require(&b, "medication_2", &mut errors);
    if !a.is_empty() && a.eq_ignore_ascii_case(&b) {
        errors.add("medication_2", "An interaction needs two different medications.");
    }
    if errors.is_empty() && repository::find_interaction(conn, &a, &b)?.is_some() {
        errors.add("medication_2", "This interaction is already recorded.");
    }
    errors.into_result()?;

    let interaction = DrugInteraction {
        id: Uuid::new_v4(),
        medication_1: a,
        medication_2: b,
        severity: new.severity,
        description: new.description,
        mechanism: new.mechanism,
        recommendation: new.recommendation,
        created_at: Utc::now(),
    };
    repository::insert_interaction(conn, &interaction)?;
    tracing::info!(interaction_id = %interaction.id, "drug interaction recorded");
    Ok(interaction)
}

/// Outcome of a two-medication lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InteractionLookup {
    Found(DrugInteraction),
    NotFound {
        medication1: String,
        medication2: String,
        interaction_found: bool,
        message: &'static str,
    },
}

pub fn check_interaction(
    conn: &Connection,
    medication1: Option<&str>,
    medication2: Option<&str>,
) -> Result<InteractionLookup, DomainError> {
    let (Some(a), Some(b)) = (
        medication1.filter(|s| !s.trim().is_empty()),
        medication2.filter(|s| !s.trim().is_empty()),
    ) else {
        return Err(DomainError::field(
            "medication1",
            "Both medication1 and medication2 parameters are required.",
        ));
    };
    Ok(match repository::find_interaction(conn, a, b)? {
        Some(found) => InteractionLookup::Found(found),
        None => InteractionLookup::NotFound {
            medication1: a.to_string(),
            medication2: b.to_string(),
            interaction_found: false,
            message: "No known interaction found",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::db::repository::{
        insert_family_member, insert_interaction, insert_log, insert_patient_medication,
        insert_prescription, sample_interaction, sample_log, sample_medication, sample_member,
        sample_prescription,
    };
    use crate::models::enums::Role;

    fn who(conn: &Connection, name: &str, role: Role) -> Identity {
        Identity::from(&make_user(conn, name, role))
    }

    fn changes(json: &str) -> MedicationChanges {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn twice_daily_creates_two_reminders() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = create_patient_medication(
            &conn,
            &pat,
            changes(r#"{"name": "Metformin", "dosage": "500mg", "frequency": "twice_daily"}"#),
        )
        .unwrap();
        let reminders = repository::list_reminders_for_medication(&conn, &med.id).unwrap();
        let times: Vec<String> = reminders.iter().map(|r| r.reminder_time.format("%H:%M").to_string()).collect();
        assert_eq!(times, vec!["09:00", "21:00"]);
        assert!(reminders.iter().all(|r| r.days_of_week.len() == 7));
    }

    #[test]
    fn past_end_date_is_stored_expired() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = create_patient_medication(
            &conn,
            &pat,
            changes(
                r#"{"name": "Amoxicillin", "dosage": "250mg", "frequency": "thrice_daily",
                    "start_date": "2020-01-01", "end_date": "2020-01-10"}"#,
            ),
        )
        .unwrap();
        assert!(!med.is_active);
        assert_eq!(med.reason_for_discontinuation, "Expired");
        let reminders = repository::list_reminders_for_medication(&conn, &med.id).unwrap();
        assert_eq!(reminders.len(), 3);
        assert!(reminders.iter().all(|r| !r.is_active));
    }

    #[test]
    fn end_before_start_and_overfull_rejected() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let err = create_patient_medication(
            &conn,
            &pat,
            changes(
                r#"{"name": "X", "dosage": "1", "frequency": "once_daily", "start_date": "2024-05-02",
                    "end_date": "2024-05-01", "total_quantity": 10, "remaining_quantity": 11}"#,
            ),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(errors) => {
                assert!(errors.get("end_date").is_some());
                assert!(errors.get("remaining_quantity").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deactivation_cascades_to_reminders() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = create_patient_medication(
            &conn,
            &pat,
            changes(r#"{"name": "Lisinopril", "dosage": "10mg", "frequency": "four_times_daily"}"#),
        )
        .unwrap();
        let med = deactivate_patient_medication(&conn, med, "Side effects").unwrap();
        assert!(!med.is_active);
        let stored = repository::get_patient_medication(&conn, &med.id).unwrap().unwrap();
        assert_eq!(stored.reason_for_discontinuation, "Side effects");
        let reminders = repository::list_reminders_for_medication(&conn, &med.id).unwrap();
        assert_eq!(reminders.len(), 4);
        assert!(reminders.iter().all(|r| !r.is_active));
        // patients only see active medications
        assert!(visible_patient_medication(&conn, &pat, &med.id).is_err());
    }

    #[test]
    fn refill_restores_quantity_and_uses_a_refill() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = create_patient_medication(
            &conn,
            &pat,
            changes(
                r#"{"name": "X", "dosage": "1", "frequency": "as_needed",
                    "total_quantity": 30, "remaining_quantity": 2, "refills_remaining": 1}"#,
            ),
        )
        .unwrap();
        let med = refill_patient_medication(&conn, med).unwrap();
        assert_eq!(med.remaining_quantity, Some(30));
        assert_eq!(med.refills_remaining, 0);
        let med = refill_patient_medication(&conn, med).unwrap();
        assert_eq!(med.refills_remaining, 0);
    }

    #[test]
    fn other_patients_medication_is_not_found() {
        let conn = test_db();
        let a = who(&conn, "a", Role::Patient);
        let b = who(&conn, "b", Role::Patient);
        let med = sample_medication(a.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        assert!(matches!(
            visible_patient_medication(&conn, &b, &med.id),
            Err(DomainError::NotFound(_))
        ));
        assert!(visible_patient_medication(&conn, &a, &med.id).is_ok());
    }

    #[test]
    fn caregiver_sees_shared_patients_medications() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let carer = who(&conn, "carer", Role::Caregiver);
        let med = sample_medication(pat.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        assert!(list_patient_medications(&conn, &carer, &MedicationFilter::default()).unwrap().is_empty());

        let mut member = sample_member(pat.user_id, "Carer");
        member.email = carer.email.clone();
        member.can_view = true;
        insert_family_member(&conn, &member).unwrap();
        assert_eq!(list_patient_medications(&conn, &carer, &MedicationFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn doctor_sees_medications_of_prescribed_patients() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let doc = who(&conn, "doc", Role::Doctor);
        let med = sample_medication(pat.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        assert!(visible_patient_medication(&conn, &doc, &med.id).is_err());
        insert_prescription(&conn, &sample_prescription(pat.user_id, doc.user_id)).unwrap();
        assert!(visible_patient_medication(&conn, &doc, &med.id).is_ok());
    }

    #[test]
    fn reminder_days_are_validated() {
        let mut errors = FieldErrors::new();
        check_days(&[0, 6], &mut errors);
        assert!(errors.is_empty());
        for bad in [vec![], vec![7], vec![1, 1]] {
            let mut errors = FieldErrors::new();
            check_days(&bad, &mut errors);
            assert!(errors.get("days_of_week").is_some(), "{bad:?} accepted");
        }
    }

    #[test]
    fn create_reminder_sets_next_trigger() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = sample_medication(pat.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        let body: ReminderChanges = serde_json::from_str(&format!(
            r#"{{"medication_id": "{}", "reminder_time": "07:30:00", "days_of_week": [2, 4]}}"#,
            med.id
        ))
        .unwrap();
        let reminder = create_reminder(&conn, &pat, body).unwrap();
        let next = reminder.next_trigger.unwrap();
        assert!(next > Utc::now());
        assert!([2, 4].contains(&(next.weekday().num_days_from_monday() as u8)));
    }

    #[test]
    fn reminder_for_invisible_medication_rejected() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let other = who(&conn, "other", Role::Patient);
        let med = sample_medication(other.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        let body = ReminderChanges {
            medication_id: Some(med.id),
            reminder_time: NaiveTime::from_hms_opt(8, 0, 0),
            ..Default::default()
        };
        assert!(matches!(create_reminder(&conn, &pat, body), Err(DomainError::Validation(_))));
    }

    #[test]
    fn todays_reminders_follow_weekday() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = create_patient_medication(
            &conn,
            &pat,
            changes(r#"{"name": "X", "dosage": "1", "frequency": "twice_daily"}"#),
        )
        .unwrap();
        let reminders = repository::list_reminders_for_medication(&conn, &med.id).unwrap();
        let monday_only = ReminderChanges {
            days_of_week: Some(vec![0]),
            ..Default::default()
        };
        update_reminder(&conn, reminders[1].clone(), monday_only).unwrap();

        // 2024-06-05 is a Wednesday
        let wednesday = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 6, 5, 6, 0, 0).unwrap();
        let today = todays_reminders(&conn, &pat, wednesday).unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].medication_name, "X");
    }

    #[test]
    fn trigger_logs_taken_dose() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = create_patient_medication(
            &conn,
            &pat,
            changes(r#"{"name": "X", "dosage": "5mg", "frequency": "once_daily"}"#),
        )
        .unwrap();
        let reminder = repository::list_reminders_for_medication(&conn, &med.id).unwrap().remove(0);
        let fired = trigger_reminder(&conn, &pat, reminder).unwrap();
        assert!(fired.last_triggered.is_some());

        let logs = repository::list_logs_for_medication(&conn, &med.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Taken);
        assert_eq!(logs[0].dosage_taken, "5mg");
        assert_eq!(logs[0].confirmation_method, "reminder");
        assert_eq!(logs[0].confirmed_by, Some(pat.user_id));
        assert_eq!(logs[0].reminder_id, Some(fired.id));
    }

    #[test]
    fn manual_log_defaults_actual_time() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = sample_medication(pat.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        let new = NewLog {
            medication_id: Some(med.id),
            ..Default::default()
        };
        let log = create_log(&conn, &pat, new, true).unwrap();
        assert!(log.actual_time.is_some());
        assert_eq!(log.confirmed_by, Some(pat.user_id));
    }

    #[test]
    fn future_times_rejected() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = sample_medication(pat.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        let later = Utc::now() + Duration::hours(2);
        let new = NewLog {
            medication_id: Some(med.id),
            scheduled_time: Some(later),
            actual_time: Some(later),
            ..Default::default()
        };
        match create_log(&conn, &pat, new, false).unwrap_err() {
            DomainError::Validation(errors) => {
                assert!(errors.get("actual_time").is_some());
                assert!(errors.get("scheduled_time").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn doctors_see_no_logs() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let doc = who(&conn, "doc", Role::Doctor);
        let med = sample_medication(pat.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        let log = sample_log(med.id, LogStatus::Taken, Utc::now() - Duration::hours(1));
        insert_log(&conn, &log).unwrap();
        assert_eq!(list_logs(&conn, &pat).unwrap().len(), 1);
        assert!(list_logs(&conn, &doc).unwrap().is_empty());
        assert!(visible_log(&conn, &doc, &log.id).is_err());
    }

    #[test]
    fn adherence_with_no_logs_is_zero() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        insert_patient_medication(&conn, &sample_medication(pat.user_id, "Aspirin")).unwrap();
        let report = adherence(&conn, &pat.user_id, Utc::now()).unwrap();
        assert_eq!(report.overall_adherence, 0.0);
        assert_eq!(report.total_medications, 1);
    }

    #[test]
    fn adherence_counts_taken_and_late() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let med = sample_medication(pat.user_id, "Aspirin");
        insert_patient_medication(&conn, &med).unwrap();
        let now = Utc::now();
        for (status, hours) in [(LogStatus::Taken, 1), (LogStatus::Late, 2), (LogStatus::Missed, 3)] {
            insert_log(&conn, &sample_log(med.id, status, now - Duration::hours(hours))).unwrap();
        }
        insert_log(&conn, &sample_log(med.id, LogStatus::Missed, now - Duration::days(30))).unwrap();
        let report = adherence(&conn, &pat.user_id, now).unwrap();
        assert_eq!(report.overall_adherence, 50.0);
        assert_eq!(report.weekly_adherence, 66.67);
        assert_eq!(report.summary.missed_doses, 2);
    }

    #[test]
    fn safety_check_reports_pairs_and_duplicates() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        insert_interaction(&conn, &sample_interaction("Warfarin", "Aspirin")).unwrap();
        insert_patient_medication(&conn, &sample_medication(pat.user_id, "aspirin")).unwrap();

        let check = MedicationCheck {
            medications: vec!["Aspirin".into(), "Ibuprofen".into(), "warfarin".into()],
            patient_id: Some(pat.user_id),
            existing_conditions: Vec::new(),
        };
        let result = safety_check(&conn, &pat, check).unwrap();
        assert_eq!(result.interactions.len(), 1);
        assert_eq!(result.interactions[0].medication_1, "Aspirin");
        assert_eq!(result.interactions[0].medication_2, "warfarin");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, "duplicate");
    }

    #[test]
    fn safety_check_needs_visible_patient() {
        let conn = test_db();
        let pat = who(&conn, "pat", Role::Patient);
        let other = who(&conn, "other", Role::Patient);
        let check = MedicationCheck {
            medications: vec!["Aspirin".into()],
            patient_id: Some(other.user_id),
            existing_conditions: Vec::new(),
        };
        assert!(matches!(safety_check(&conn, &pat, check), Err(DomainError::NotFound(_))));

        let empty = MedicationCheck {
            medications: Vec::new(),
            patient_id: None,
            existing_conditions: Vec::new(),
        };
        assert!(matches!(safety_check(&conn, &pat, empty), Err(DomainError::Validation(_))));
    }

    #[test]
    fn interaction_check_is_symmetric() {
        let conn = test_db();
        let stored = create_interaction(
            &conn,
            NewInteraction {
                medication_1: "Warfarin".into(),
                medication_2: "Aspirin".into(),
                severity: InteractionSeverity::Major,
                description: "bleeding".into(),
                mechanism: String::new(),
                recommendation: "avoid".into(),
            },
        )
        .unwrap();
        for (a, b) in [("warfarin", "aspirin"), ("ASPIRIN", "Warfarin")] {
            match check_interaction(&conn, Some(a), Some(b)).unwrap() {
                InteractionLookup::Found(found) => assert_eq!(found.id, stored.id),
                other => panic!("expected a hit, got {other:?}"),
            }
        }
        assert!(matches!(
            check_interaction(&conn, Some("aspirin"), Some("paracetamol")).unwrap(),
            InteractionLookup::NotFound { interaction_found: false, .. }
        ));
        assert!(check_interaction(&conn, Some("aspirin"), None).is_err());
    }

    #[test]
    fn duplicate_interaction_rejected_in_either_order() {
        let conn = test_db();
        insert_interaction(&conn, &sample_interaction("Warfarin", "Aspirin")).unwrap();
        let err = create_interaction(
            &conn,
            NewInteraction {
                medication_1: "aspirin".into(),
                medication_2: "warfarin".into(),
                severity: InteractionSeverity::Minor,
                description: String::new(),
                mechanism: String::new(),
                recommendation: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn catalog_search_matches_brand() {
        let conn = test_db();
        let new: NewCatalogMedication =
            serde_json::from_str(r#"{"name": "Paracetamol", "brand_name": "Tylenol", "dosage_form": "tablet"}"#).unwrap();
        let med = create_catalog_medication(&conn, new).unwrap();
        assert!(med.requires_prescription);
        assert_eq!(search_catalog(&conn, Some("tylen")).unwrap().len(), 1);
        assert!(search_catalog(&conn, Some("ibu")).unwrap().is_empty());
    }
}
