use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_ts, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::DoctorProfile;
use crate::scoping::Scope;

const COLUMNS: &str = "id, user_id, specialization, license_number, hospital_affiliation,
     years_of_experience, consultation_fee, is_available, available_days, available_hours,
     created_at, updated_at";

pub fn insert_doctor_profile(conn: &Connection, profile: &DoctorProfile) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO doctor_profiles (id, user_id, specialization, license_number,
         hospital_affiliation, years_of_experience, consultation_fee, is_available,
         available_days, available_hours, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            profile.id.to_string(),
            profile.user_id.to_string(),
            profile.specialization,
            profile.license_number,
            profile.hospital_affiliation,
            profile.years_of_experience,
            profile.consultation_fee,
            profile.is_available,
            profile.available_days,
            profile.available_hours,
            format_ts(&profile.created_at),
            format_ts(&profile.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_doctor_profile(conn: &Connection, id: &Uuid) -> Result<Option<DoctorProfile>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM doctor_profiles WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_doctor_profile)
        .optional()?)
}

pub fn get_doctor_profile_by_user(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Option<DoctorProfile>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM doctor_profiles WHERE user_id = ?1");
    Ok(conn
        .query_row(&sql, params![user_id.to_string()], row_to_doctor_profile)
        .optional()?)
}

pub fn list_doctor_profiles(conn: &Connection, scope: &Scope) -> Result<Vec<DoctorProfile>, DatabaseError> {
    let (filter, args) = scope.sql_filter("user_id");
    let sql = format!("SELECT {COLUMNS} FROM doctor_profiles WHERE {filter} ORDER BY created_at");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_doctor_profile)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// True when another doctor already holds `license`.
pub fn license_taken(conn: &Connection, license: &str, except: Option<&Uuid>) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM doctor_profiles WHERE license_number = ?1 AND id IS NOT ?2",
        params![license, except.map(|id| id.to_string())],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn update_doctor_profile(conn: &Connection, profile: &DoctorProfile) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE doctor_profiles SET specialization = ?2, license_number = ?3,
         hospital_affiliation = ?4, years_of_experience = ?5, consultation_fee = ?6,
         is_available = ?7, available_days = ?8, available_hours = ?9, updated_at = ?10
         WHERE id = ?1",
        params![
            profile.id.to_string(),
            profile.specialization,
            profile.license_number,
            profile.hospital_affiliation,
            profile.years_of_experience,
            profile.consultation_fee,
            profile.is_available,
            profile.available_days,
            profile.available_hours,
            format_ts(&profile.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&profile.id));
    }
    Ok(())
}

pub fn delete_doctor_profile(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM doctor_profiles WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "DoctorProfile".into(),
        id: id.to_string(),
    }
}

fn row_to_doctor_profile(row: &Row) -> rusqlite::Result<DoctorProfile> {
    Ok(DoctorProfile {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        specialization: row.get(2)?,
        license_number: row.get(3)?,
        hospital_affiliation: row.get(4)?,
        years_of_experience: row.get(5)?,
        consultation_fee: row.get(6)?,
        is_available: row.get(7)?,
        available_days: row.get(8)?,
        available_hours: row.get(9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::models::enums::Role;

    #[test]
    fn license_numbers_are_unique() {
        let conn = test_db();
        let a = make_user(&conn, "doc_a", Role::Doctor);
        let b = make_user(&conn, "doc_b", Role::Doctor);

        let mut first = DoctorProfile::new(a.id);
        first.license_number = Some("LIC-1".into());
        insert_doctor_profile(&conn, &first).unwrap();

        assert!(license_taken(&conn, "LIC-1", None).unwrap());
        assert!(!license_taken(&conn, "LIC-1", Some(&first.id)).unwrap());

        let mut second = DoctorProfile::new(b.id);
        second.license_number = Some("LIC-1".into());
        assert!(insert_doctor_profile(&conn, &second).unwrap_err().is_unique_violation());
    }

    #[test]
    fn missing_licenses_do_not_collide() {
        let conn = test_db();
        let a = make_user(&conn, "doc_a", Role::Doctor);
        let b = make_user(&conn, "doc_b", Role::Doctor);
        insert_doctor_profile(&conn, &DoctorProfile::new(a.id)).unwrap();
        insert_doctor_profile(&conn, &DoctorProfile::new(b.id)).unwrap();
        assert_eq!(list_doctor_profiles(&conn, &Scope::All).unwrap().len(), 2);
    }

    #[test]
    fn update_persists_fee_and_availability() {
        let conn = test_db();
        let doc = make_user(&conn, "doc", Role::Doctor);
        let mut profile = DoctorProfile::new(doc.id);
        insert_doctor_profile(&conn, &profile).unwrap();

        profile.consultation_fee = Some(75.5);
        profile.is_available = false;
        profile.years_of_experience = Some(12);
        update_doctor_profile(&conn, &profile).unwrap();

        let fetched = get_doctor_profile_by_user(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(fetched.consultation_fee, Some(75.5));
        assert!(!fetched.is_available);
        assert_eq!(fetched.years_of_experience, Some(12));

        delete_doctor_profile(&conn, &profile.id).unwrap();
        assert!(get_doctor_profile(&conn, &profile.id).unwrap().is_none());
    }
}
