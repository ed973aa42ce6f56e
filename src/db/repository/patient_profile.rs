use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_ts, opt_enum_col, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::PatientProfile;
use crate::scoping::Scope;

const COLUMNS: &str = "id, user_id, blood_type, allergies, chronic_conditions,
     emergency_contact_name, emergency_contact_phone, emergency_contact_relationship,
     created_at, updated_at";

pub fn insert_patient_profile(conn: &Connection, profile: &PatientProfile) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patient_profiles (id, user_id, blood_type, allergies, chronic_conditions,
         emergency_contact_name, emergency_contact_phone, emergency_contact_relationship,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            profile.id.to_string(),
            profile.user_id.to_string(),
            profile.blood_type.map(|b| b.as_str()),
            profile.allergies,
            profile.chronic_conditions,
            profile.emergency_contact_name,
            profile.emergency_contact_phone,
            profile.emergency_contact_relationship,
            format_ts(&profile.created_at),
            format_ts(&profile.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient_profile(conn: &Connection, id: &Uuid) -> Result<Option<PatientProfile>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM patient_profiles WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_patient_profile)
        .optional()?)
}

pub fn get_patient_profile_by_user(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Option<PatientProfile>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM patient_profiles WHERE user_id = ?1");
    Ok(conn
        .query_row(&sql, params![user_id.to_string()], row_to_patient_profile)
        .optional()?)
}

/// Profiles whose owning user falls within `scope`.
pub fn list_patient_profiles(conn: &Connection, scope: &Scope) -> Result<Vec<PatientProfile>, DatabaseError> {
    let (filter, args) = scope.sql_filter("user_id");
    let sql = format!("SELECT {COLUMNS} FROM patient_profiles WHERE {filter} ORDER BY created_at");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_patient_profile)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_patient_profile(conn: &Connection, profile: &PatientProfile) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE patient_profiles SET blood_type = ?2, allergies = ?3, chronic_conditions = ?4,
         emergency_contact_name = ?5, emergency_contact_phone = ?6,
         emergency_contact_relationship = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            profile.id.to_string(),
            profile.blood_type.map(|b| b.as_str()),
            profile.allergies,
            profile.chronic_conditions,
            profile.emergency_contact_name,
            profile.emergency_contact_phone,
            profile.emergency_contact_relationship,
            format_ts(&profile.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&profile.id));
    }
    Ok(())
}

pub fn delete_patient_profile(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM patient_profiles WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "PatientProfile".into(),
        id: id.to_string(),
    }
}

fn row_to_patient_profile(row: &Row) -> rusqlite::Result<PatientProfile> {
    Ok(PatientProfile {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        blood_type: opt_enum_col(row, 2)?,
        allergies: row.get(3)?,
        chronic_conditions: row.get(4)?,
        emergency_contact_name: row.get(5)?,
        emergency_contact_phone: row.get(6)?,
        emergency_contact_relationship: row.get(7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}
