use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_ts, opt_enum_col, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::HealthProfile;
use crate::scoping::Scope;

const COLUMNS: &str = "id, user_id, gender, height, weight, blood_type, allergies,
     current_medications, medical_conditions, surgical_history, family_history,
     smoking_status, alcohol_consumption, exercise_frequency, primary_doctor_name,
     primary_doctor_phone, primary_doctor_clinic, emergency_contact_name,
     emergency_contact_phone, emergency_contact_relation, insurance_provider, insurance_id,
     insurance_group, additional_notes, is_complete, created_at, updated_at";

pub fn insert_health_profile(conn: &Connection, hp: &HealthProfile) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO health_profiles (id, user_id, gender, height, weight, blood_type, allergies,
         current_medications, medical_conditions, surgical_history, family_history,
         smoking_status, alcohol_consumption, exercise_frequency, primary_doctor_name,
         primary_doctor_phone, primary_doctor_clinic, emergency_contact_name,
         emergency_contact_phone, emergency_contact_relation, insurance_provider, insurance_id,
         insurance_group, additional_notes, is_complete, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
         ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        params![
            hp.id.to_string(),
            hp.user_id.to_string(),
            hp.gender.map(|g| g.as_str()),
            hp.height,
            hp.weight,
            hp.blood_type.map(|b| b.as_str()),
            hp.allergies,
            hp.current_medications,
            hp.medical_conditions,
            hp.surgical_history,
            hp.family_history,
            hp.smoking_status,
            hp.alcohol_consumption,
            hp.exercise_frequency,
            hp.primary_doctor_name,
            hp.primary_doctor_phone,
            hp.primary_doctor_clinic,
            hp.emergency_contact_name,
            hp.emergency_contact_phone,
            hp.emergency_contact_relation,
            hp.insurance_provider,
            hp.insurance_id,
            hp.insurance_group,
            hp.additional_notes,
            hp.is_complete,
            format_ts(&hp.created_at),
            format_ts(&hp.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_health_profile(conn: &Connection, id: &Uuid) -> Result<Option<HealthProfile>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM health_profiles WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_health_profile)
        .optional()?)
}

pub fn get_health_profile_by_user(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Option<HealthProfile>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM health_profiles WHERE user_id = ?1");
    Ok(conn
        .query_row(&sql, params![user_id.to_string()], row_to_health_profile)
        .optional()?)
}

pub fn list_health_profiles(conn: &Connection, scope: &Scope) -> Result<Vec<HealthProfile>, DatabaseError> {
    let (filter, args) = scope.sql_filter("user_id");
    let sql = format!("SELECT {COLUMNS} FROM health_profiles WHERE {filter} ORDER BY created_at");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_health_profile)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_health_profile(conn: &Connection, hp: &HealthProfile) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE health_profiles SET gender = ?2, height = ?3, weight = ?4, blood_type = ?5,
         allergies = ?6, current_medications = ?7, medical_conditions = ?8,
         surgical_history = ?9, family_history = ?10, smoking_status = ?11,
         alcohol_consumption = ?12, exercise_frequency = ?13, primary_doctor_name = ?14,
         primary_doctor_phone = ?15, primary_doctor_clinic = ?16, emergency_contact_name = ?17,
         emergency_contact_phone = ?18, emergency_contact_relation = ?19,
         insurance_provider = ?20, insurance_id = ?21, insurance_group = ?22,
         additional_notes = ?23, is_complete = ?24, updated_at = ?25
         WHERE id = ?1",
        params![
            hp.id.to_string(),
            hp.gender.map(|g| g.as_str()),
            hp.height,
            hp.weight,
            hp.blood_type.map(|b| b.as_str()),
            hp.allergies,
            hp.current_medications,
            hp.medical_conditions,
            hp.surgical_history,
            hp.family_history,
            hp.smoking_status,
            hp.alcohol_consumption,
            hp.exercise_frequency,
            hp.primary_doctor_name,
            hp.primary_doctor_phone,
            hp.primary_doctor_clinic,
            hp.emergency_contact_name,
            hp.emergency_contact_phone,
            hp.emergency_contact_relation,
            hp.insurance_provider,
            hp.insurance_id,
            hp.insurance_group,
            hp.additional_notes,
            hp.is_complete,
            format_ts(&hp.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&hp.id));
    }
    Ok(())
}

pub fn delete_health_profile(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM health_profiles WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "HealthProfile".into(),
        id: id.to_string(),
    }
}

fn row_to_health_profile(row: &Row) -> rusqlite::Result<HealthProfile> {
    Ok(HealthProfile {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        gender: opt_enum_col(row, 2)?,
        height: row.get(3)?,
        weight: row.get(4)?,
        blood_type: opt_enum_col(row, 5)?,
        allergies: row.get(6)?,
        current_medications: row.get(7)?,
        medical_conditions: row.get(8)?,
        surgical_history: row.get(9)?,
        family_history: row.get(10)?,
        smoking_status: row.get(11)?,
        alcohol_consumption: row.get(12)?,
        exercise_frequency: row.get(13)?,
        primary_doctor_name: row.get(14)?,
        primary_doctor_phone: row.get(15)?,
        primary_doctor_clinic: row.get(16)?,
        emergency_contact_name: row.get(17)?,
        emergency_contact_phone: row.get(18)?,
        emergency_contact_relation: row.get(19)?,
        insurance_provider: row.get(20)?,
        insurance_id: row.get(21)?,
        insurance_group: row.get(22)?,
        additional_notes: row.get(23)?,
        is_complete: row.get(24)?,
        created_at: ts_col(row, 25)?,
        updated_at: ts_col(row, 26)?,
    })
}
