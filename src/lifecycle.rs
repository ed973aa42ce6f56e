//! Side effects that follow record creation and updates.
//!
//! Callers run these inside the same transaction as the triggering write.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository::{
    deactivate_reminders_for_medication, insert_doctor_profile, insert_health_profile,
    insert_patient_profile, insert_reminder, set_medication_inactive,
};
use crate::db::DatabaseError;
use crate::metrics::{is_expired, next_trigger_after};
use crate::models::enums::{NotificationType, Role};
use crate::models::{
    DoctorProfile, HealthProfile, MedicationReminder, PatientMedication, PatientProfile, User,
};

pub const EXPIRED_REASON: &str = "Expired";
pub const EVERY_DAY: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];

/// Gives a new account the profile records its role needs. A profile that
/// already exists (a concurrent writer got there first) is left alone.
pub fn ensure_role_profiles(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    match user.role {
        Role::Patient => {
            tolerate_existing(insert_patient_profile(conn, &PatientProfile::new(user.id)), user, "patient")?;
            tolerate_existing(insert_health_profile(conn, &HealthProfile::new(user.id)), user, "health")?;
        }
        Role::Doctor => {
            tolerate_existing(insert_doctor_profile(conn, &DoctorProfile::new(user.id)), user, "doctor")?;
        }
        Role::Caregiver | Role::Admin => {}
    }
    Ok(())
}

fn tolerate_existing(result: Result<(), DatabaseError>, user: &User, kind: &str) -> Result<(), DatabaseError> {
    match result {
        Ok(()) => {
            tracing::info!(user_id = %user.id, kind, "profile created");
            Ok(())
        }
        Err(e) if e.is_unique_violation() => {
            tracing::warn!(user_id = %user.id, kind, "profile already exists, skipping");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Reminders implied by a medication's frequency, every day of the week.
pub fn default_reminders(med: &PatientMedication, now: DateTime<Utc>) -> Vec<MedicationReminder> {
    med.frequency
        .default_reminder_hours()
        .iter()
        .filter_map(|hour| NaiveTime::from_hms_opt(*hour, 0, 0))
        .map(|time| MedicationReminder {
            id: Uuid::new_v4(),
            medication_id: med.id,
            reminder_time: time,
            days_of_week: EVERY_DAY.to_vec(),
            notification_type: NotificationType::Push,
            is_active: true,
            last_triggered: None,
            next_trigger: next_trigger_after(now, time, &EVERY_DAY),
            created_at: now,
            updated_at: now,
        })
        .collect()
}

pub fn create_default_reminders(conn: &Connection, med: &PatientMedication) -> Result<usize, DatabaseError> {
    let reminders = default_reminders(med, Utc::now());
    for reminder in &reminders {
        insert_reminder(conn, reminder)?;
    }
    if !reminders.is_empty() {
        tracing::info!(medication_id = %med.id, count = reminders.len(), "default reminders created");
    }
    Ok(reminders.len())
}

/// Marks a medication inactive and switches off all of its reminders.
pub fn deactivate_medication(conn: &Connection, medication_id: &Uuid, reason: &str) -> Result<usize, DatabaseError> {
    set_medication_inactive(conn, medication_id, reason)?;
    let reminders = deactivate_reminders_for_medication(conn, medication_id)?;
    tracing::info!(%medication_id, reminders, "medication deactivated");
    Ok(reminders)
}

/// Deactivates a still-active medication whose end date has passed.
/// Updates `med` in place; returns whether anything changed.
pub fn apply_expiry(conn: &Connection, med: &mut PatientMedication, today: NaiveDate) -> Result<bool, DatabaseError> {
    if !med.is_active || !is_expired(med.end_date, today) {
        return Ok(false);
    }
    deactivate_medication(conn, &med.id, EXPIRED_REASON)?;
    med.is_active = false;
    med.reason_for_discontinuation = EXPIRED_REASON.to_string();
    Ok(true)
}
