use chrono::{NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    date_col, enum_col, format_date, format_ts, json_col, opt_date_col, to_json, ts_col, uuid_col,
};
use crate::db::DatabaseError;
use crate::models::PatientMedication;
use crate::scoping::MedicationScope;

const COLUMNS: &str = "id, patient_id, name, dosage, frequency, start_date, end_date,
     instructions, prescribing_doctor, pharmacy, is_active, reason_for_discontinuation,
     total_quantity, remaining_quantity, refills_remaining, safety_checked, safety_warnings,
     created_at, updated_at";

/// Optional narrowing applied on top of the requester's scope.
#[derive(Debug, Clone, Default)]
pub struct MedicationFilter {
    pub is_active: Option<bool>,
    /// Only medications whose end date is strictly before this day.
    pub ended_before: Option<NaiveDate>,
}

pub fn insert_patient_medication(conn: &Connection, med: &PatientMedication) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patient_medications (id, patient_id, name, dosage, frequency, start_date,
         end_date, instructions, prescribing_doctor, pharmacy, is_active,
         reason_for_discontinuation, total_quantity, remaining_quantity, refills_remaining,
         safety_checked, safety_warnings, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            med.id.to_string(),
            med.patient_id.to_string(),
            med.name,
            med.dosage,
            med.frequency.as_str(),
            format_date(&med.start_date),
            med.end_date.as_ref().map(format_date),
            med.instructions,
            med.prescribing_doctor,
            med.pharmacy,
            med.is_active,
            med.reason_for_discontinuation,
            med.total_quantity,
            med.remaining_quantity,
            med.refills_remaining,
            med.safety_checked,
            to_json(&med.safety_warnings),
            format_ts(&med.created_at),
            format_ts(&med.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient_medication(conn: &Connection, id: &Uuid) -> Result<Option<PatientMedication>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM patient_medications WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_patient_medication)
        .optional()?)
}

/// Medications visible under `scope`, newest first.
pub fn list_patient_medications(
    conn: &Connection,
    scope: &MedicationScope,
    filter: &MedicationFilter,
) -> Result<Vec<PatientMedication>, DatabaseError> {
    let (scope_sql, mut args) = scope.patients.sql_filter("patient_id");
    let mut clauses = vec![scope_sql];
    if scope.active_only {
        clauses.push("is_active = 1".into());
    }
    if let Some(active) = filter.is_active {
        clauses.push(format!("is_active = {}", active as i32));
    }
    if let Some(day) = filter.ended_before {
        args.push(format_date(&day));
        clauses.push("end_date IS NOT NULL AND end_date < ?".into());
    }
    let sql = format!(
        "SELECT {COLUMNS} FROM patient_medications WHERE {} ORDER BY created_at DESC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_patient_medication)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// A patient's currently active medications, by name.
pub fn list_active_medications_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<PatientMedication>, DatabaseError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM patient_medications
         WHERE patient_id = ?1 AND is_active = 1 ORDER BY name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![patient_id.to_string()], row_to_patient_medication)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_patient_medication(conn: &Connection, med: &PatientMedication) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE patient_medications SET name = ?2, dosage = ?3, frequency = ?4,
         start_date = ?5, end_date = ?6, instructions = ?7, prescribing_doctor = ?8,
         pharmacy = ?9, is_active = ?10, reason_for_discontinuation = ?11,
         total_quantity = ?12, remaining_quantity = ?13, refills_remaining = ?14,
         safety_checked = ?15, safety_warnings = ?16, updated_at = ?17
         WHERE id = ?1",
        params![
            med.id.to_string(),
            med.name,
            med.dosage,
            med.frequency.as_str(),
            format_date(&med.start_date),
            med.end_date.as_ref().map(format_date),
            med.instructions,
            med.prescribing_doctor,
            med.pharmacy,
            med.is_active,
            med.reason_for_discontinuation,
            med.total_quantity,
            med.remaining_quantity,
            med.refills_remaining,
            med.safety_checked,
            to_json(&med.safety_warnings),
            format_ts(&med.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&med.id));
    }
    Ok(())
}

/// Flags a medication inactive with a reason. Reminders are handled by the caller.
pub fn set_medication_inactive(conn: &Connection, id: &Uuid, reason: &str) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE patient_medications SET is_active = 0, reason_for_discontinuation = ?2,
         updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), reason, format_ts(&Utc::now())],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

pub fn delete_patient_medication(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM patient_medications WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "PatientMedication".into(),
        id: id.to_string(),
    }
}

fn row_to_patient_medication(row: &Row) -> rusqlite::Result<PatientMedication> {
    Ok(PatientMedication {
        id: uuid_col(row, 0)?,
        patient_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        dosage: row.get(3)?,
        frequency: enum_col(row, 4)?,
        start_date: date_col(row, 5)?,
        end_date: opt_date_col(row, 6)?,
        instructions: row.get(7)?,
        prescribing_doctor: row.get(8)?,
        pharmacy: row.get(9)?,
        is_active: row.get(10)?,
        reason_for_discontinuation: row.get(11)?,
        total_quantity: row.get(12)?,
        remaining_quantity: row.get(13)?,
        refills_remaining: row.get(14)?,
        safety_checked: row.get(15)?,
        safety_warnings: json_col(row, 16)?,
        created_at: ts_col(row, 17)?,
        updated_at: ts_col(row, 18)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_medication(patient_id: Uuid, name: &str) -> PatientMedication {
    let now = Utc::now();
    PatientMedication {
        id: Uuid::new_v4(),
        patient_id,
        name: name.into(),
        dosage: "10mg".into(),
        frequency: crate::models::enums::Frequency::OnceDaily,
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
    }
}
