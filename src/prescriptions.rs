//! Prescriptions written by doctors for patients, and their safety scan.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::repository;
use crate::metrics::{pairwise_interactions, InteractionHit};
use crate::models::enums::{PrescriptionSource, PrescriptionStatus, Role};
use crate::models::Prescription;
use crate::scoping;
use crate::validation::{nullable, or_not_found, DomainError, FieldErrors};

#[derive(Debug, Clone, Serialize)]
pub struct PrescriptionView {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub patient_name: String,
    pub doctor_name: String,
}

pub fn prescription_view(conn: &Connection, rx: Prescription) -> Result<PrescriptionView, DomainError> {
    let name = |id: &Uuid| -> Result<String, DomainError> {
        Ok(repository::get_user(conn, id)?.map(|u| u.display_name()).unwrap_or_default())
    };
    Ok(PrescriptionView {
        patient_name: name(&rx.patient_id)?,
        doctor_name: name(&rx.doctor_id)?,
        prescription: rx,
    })
}

/// Create and update body. Creation needs `patient_id`; `issue_date`
/// defaults to now.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrescriptionChanges {
    pub patient_id: Option<Uuid>,
    pub issue_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "nullable")]
    pub expiry_date: Option<Option<DateTime<Utc>>>,
    pub status: Option<PrescriptionStatus>,
    pub diagnosis: Option<String>,
    pub instructions: Option<String>,
    pub notes: Option<String>,
    pub source: Option<PrescriptionSource>,
}

impl PrescriptionChanges {
    fn apply(self, rx: &mut Prescription) -> Result<(), DomainError> {
        if let Some(v) = self.issue_date {
            rx.issue_date = v;
        }
        if let Some(v) = self.expiry_date {
            rx.expiry_date = v;
        }
        if let Some(v) = self.status {
            rx.status = v;
        }
        if let Some(v) = self.diagnosis {
            rx.diagnosis = v;
        }
        if let Some(v) = self.instructions {
            rx.instructions = v;
        }
        if let Some(v) = self.notes {
            rx.notes = v;
        }
        if let Some(v) = self.source {
            rx.source = v;
        }
        if rx.expiry_date.is_some_and(|expiry| expiry <= rx.issue_date) {
            return Err(DomainError::field("expiry_date", "Expiry date must be after issue date."));
        }
        rx.updated_at = Utc::now();
        Ok(())
    }
}

pub fn list_prescriptions(conn: &Connection, identity: &Identity) -> Result<Vec<PrescriptionView>, DomainError> {
    repository::list_prescriptions(conn, &scoping::prescriptions(identity))?
        .into_iter()
        .map(|rx| prescription_view(conn, rx))
        .collect()
}

pub fn visible_prescription(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<Prescription, DomainError> {
    let scope = scoping::prescriptions(identity);
    repository::get_prescription(conn, id)?
        .filter(|rx| scope.admits(&rx.patient_id, &rx.doctor_id))
        .ok_or(DomainError::NotFound("Prescription"))
}

/// Writes a prescription signed by the requesting doctor.
pub fn create_prescription(
    conn: &Connection,
    doctor: &Identity,
    changes: PrescriptionChanges,
) -> Result<Prescription, DomainError> {
    let mut errors = FieldErrors::new();
    let patient = match changes.patient_id {
        None => {
            errors.add("patient_id", "This field is required.");
            None
        }
        Some(id) => {
            let patient = repository::get_user(conn, &id)?.filter(|u| u.role == Role::Patient);
            if patient.is_none() {
                errors.add("patient_id", "Patient not found.");
            }
            patient
        }
    };
    errors.into_result()?;
    let Some(patient) = patient else {
        return Err(DomainError::field("patient_id", "Patient not found."));
    };

    let now = Utc::now();
    let mut rx = Prescription {
        id: Uuid::new_v4(),
        patient_id: patient.id,
        doctor_id: doctor.user_id,
        issue_date: now,
        expiry_date: None,
        status: PrescriptionStatus::Active,
        diagnosis: String::new(),
        instructions: String::new(),
        notes: String::new(),
        safety_scan_performed: false,
        safety_warnings: Vec::new(),
        scan_timestamp: None,
        source: PrescriptionSource::Manual,
        created_at: now,
        updated_at: now,
    };
    changes.apply(&mut rx)?;
    repository::insert_prescription(conn, &rx)?;
    tracing::info!(prescription_id = %rx.id, doctor_id = %rx.doctor_id, patient_id = %rx.patient_id, "prescription issued");
    Ok(rx)
}

/// Patient and doctor are fixed once written; everything else may change.
pub fn update_prescription(
    conn: &Connection,
    mut rx: Prescription,
    mut changes: PrescriptionChanges,
) -> Result<Prescription, DomainError> {
    if changes.patient_id.take().is_some_and(|id| id != rx.patient_id) {
        return Err(DomainError::field("patient_id", "The patient of a prescription cannot be changed."));
    }
    changes.apply(&mut rx)?;
    repository::update_prescription(conn, &rx)?;
    Ok(rx)
}

pub fn delete_prescription(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_prescription(conn, id).map_err(or_not_found("Prescription"))
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyScan {
    pub prescription_id: Uuid,
    pub safety_scan_performed: bool,
    pub scan_timestamp: DateTime<Utc>,
    pub interactions: Vec<InteractionHit>,
    pub warnings: Vec<String>,
    pub message: String,
}

/// Checks the patient's active medications against the interaction table
/// and stamps the result on the prescription.
pub fn safety_scan(conn: &Connection, mut rx: Prescription) -> Result<SafetyScan, DomainError> {
    let names: Vec<String> = repository::list_active_medications_for_patient(conn, &rx.patient_id)?
        .into_iter()
        .map(|m| m.name)
        .collect();
    let table = repository::list_interactions(conn)?;
    let interactions = pairwise_interactions(&names, &table);
    let warnings: Vec<String> = interactions
        .iter()
        .map(|hit| {
            format!(
                "{} + {} ({}): {}",
                hit.medication_1, hit.medication_2, hit.severity, hit.description
            )
        })
        .collect();

    let now = Utc::now();
    rx.safety_scan_performed = true;
    rx.safety_warnings = warnings.clone();
    rx.scan_timestamp = Some(now);
    rx.updated_at = now;
    repository::update_prescription(conn, &rx)?;

    let message = match warnings.len() {
        0 => format!("Safety scan completed: {} active medications, no interactions found", names.len()),
        n => format!("Safety scan completed: {n} interaction(s) found"),
    };
    tracing::info!(prescription_id = %rx.id, warnings = warnings.len(), "safety scan completed");
    Ok(SafetyScan {
        prescription_id: rx.id,
        safety_scan_performed: true,
        scan_timestamp: now,
        interactions,
        warnings,
        message,
    })
}
