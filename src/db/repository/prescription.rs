use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{enum_col, format_ts, json_col, opt_ts_col, to_json, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::Prescription;
use crate::scoping::PrescriptionScope;

const COLUMNS: &str = "id, patient_id, doctor_id, issue_date, expiry_date, status, diagnosis,
     instructions, notes, safety_scan_performed, safety_warnings, scan_timestamp, source,
     created_at, updated_at";

pub fn insert_prescription(conn: &Connection, rx: &Prescription) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO prescriptions (id, patient_id, doctor_id, issue_date, expiry_date, status,
         diagnosis, instructions, notes, safety_scan_performed, safety_warnings, scan_timestamp,
         source, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            rx.id.to_string(),
            rx.patient_id.to_string(),
            rx.doctor_id.to_string(),
            format_ts(&rx.issue_date),
            rx.expiry_date.as_ref().map(format_ts),
            rx.status.as_str(),
            rx.diagnosis,
            rx.instructions,
            rx.notes,
            rx.safety_scan_performed,
            to_json(&rx.safety_warnings),
            rx.scan_timestamp.as_ref().map(format_ts),
            rx.source.as_str(),
            format_ts(&rx.created_at),
            format_ts(&rx.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_prescription(conn: &Connection, id: &Uuid) -> Result<Option<Prescription>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM prescriptions WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_prescription)
        .optional()?)
}

/// Prescriptions matching both the patient and the doctor side of `scope`.
pub fn list_prescriptions(conn: &Connection, scope: &PrescriptionScope) -> Result<Vec<Prescription>, DatabaseError> {
    let (patients, mut args) = scope.patients.sql_filter("patient_id");
    let (doctors, doctor_args) = scope.doctors.sql_filter("doctor_id");
    args.extend(doctor_args);
    let sql = format!(
        "SELECT {COLUMNS} FROM prescriptions WHERE {patients} AND {doctors}
         ORDER BY issue_date DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_prescription)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Patients a doctor has written at least one prescription for.
pub fn patients_of_doctor(conn: &Connection, doctor_id: &Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT DISTINCT patient_id FROM prescriptions WHERE doctor_id = ?1")?;
    let rows = stmt.query_map(params![doctor_id.to_string()], |row| uuid_col(row, 0))?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_prescription(conn: &Connection, rx: &Prescription) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE prescriptions SET issue_date = ?2, expiry_date = ?3, status = ?4, diagnosis = ?5,
         instructions = ?6, notes = ?7, safety_scan_performed = ?8, safety_warnings = ?9,
         scan_timestamp = ?10, source = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            rx.id.to_string(),
            format_ts(&rx.issue_date),
            rx.expiry_date.as_ref().map(format_ts),
            rx.status.as_str(),
            rx.diagnosis,
            rx.instructions,
            rx.notes,
            rx.safety_scan_performed,
            to_json(&rx.safety_warnings),
            rx.scan_timestamp.as_ref().map(format_ts),
            rx.source.as_str(),
            format_ts(&rx.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&rx.id));
    }
    Ok(())
}

pub fn delete_prescription(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute("DELETE FROM prescriptions WHERE id = ?1", params![id.to_string()])?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "Prescription".into(),
        id: id.to_string(),
    }
}

fn row_to_prescription(row: &Row) -> rusqlite::Result<Prescription> {
    Ok(Prescription {
        id: uuid_col(row, 0)?,
        patient_id: uuid_col(row, 1)?,
        doctor_id: uuid_col(row, 2)?,
        issue_date: ts_col(row, 3)?,
        expiry_date: opt_ts_col(row, 4)?,
        status: enum_col(row, 5)?,
        diagnosis: row.get(6)?,
        instructions: row.get(7)?,
        notes: row.get(8)?,
        safety_scan_performed: row.get(9)?,
        safety_warnings: json_col(row, 10)?,
        scan_timestamp: opt_ts_col(row, 11)?,
        source: enum_col(row, 12)?,
        created_at: ts_col(row, 13)?,
        updated_at: ts_col(row, 14)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_prescription(patient_id: Uuid, doctor_id: Uuid) -> Prescription {
    let now = chrono::Utc::now();
    Prescription {
        id: Uuid::new_v4(),
        patient_id,
        doctor_id,
        issue_date: now,
        expiry_date: Some(now + chrono::Duration::days(30)),
        status: crate::models::enums::PrescriptionStatus::Active,
        diagnosis: "Hypertension".into(),
        instructions: "Once daily with food".into(),
        notes: String::new(),
        safety_scan_performed: false,
        safety_warnings: Vec::new(),
        scan_timestamp: None,
        source: crate::models::enums::PrescriptionSource::Manual,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::models::enums::Role;
    use crate::scoping::Scope;

    #[test]
    fn scope_filters_by_patient_and_doctor() {
        let conn = test_db();
        let pat = make_user(&conn, "pat", Role::Patient);
        let other = make_user(&conn, "other", Role::Patient);
        let doc = make_user(&conn, "doc", Role::Doctor);
        let doc2 = make_user(&conn, "doc2", Role::Doctor);

        insert_prescription(&conn, &sample_prescription(pat.id, doc.id)).unwrap();
        insert_prescription(&conn, &sample_prescription(other.id, doc.id)).unwrap();
        insert_prescription(&conn, &sample_prescription(pat.id, doc2.id)).unwrap();

        let received = list_prescriptions(
            &conn,
            &PrescriptionScope { patients: Scope::Only(vec![pat.id]), doctors: Scope::All },
        )
        .unwrap();
        assert_eq!(received.len(), 2);

        let written = list_prescriptions(
            &conn,
            &PrescriptionScope { patients: Scope::All, doctors: Scope::Only(vec![doc.id]) },
        )
        .unwrap();
        assert_eq!(written.len(), 2);

        let mut patients = patients_of_doctor(&conn, &doc.id).unwrap();
        patients.sort();
        let mut expected = vec![pat.id, other.id];
        expected.sort();
        assert_eq!(patients, expected);
    }

    #[test]
    fn scan_fields_persist() {
        let conn = test_db();
        let pat = make_user(&conn, "pat", Role::Patient);
        let doc = make_user(&conn, "doc", Role::Doctor);
        let mut rx = sample_prescription(pat.id, doc.id);
        insert_prescription(&conn, &rx).unwrap();

        rx.safety_scan_performed = true;
        rx.safety_warnings = vec!["Warfarin + Aspirin: major".into()];
        rx.scan_timestamp = Some(chrono::Utc::now());
        update_prescription(&conn, &rx).unwrap();

        let fetched = get_prescription(&conn, &rx.id).unwrap().unwrap();
        assert!(fetched.safety_scan_performed);
        assert_eq!(fetched.safety_warnings.len(), 1);
        assert!(fetched.scan_timestamp.is_some());

        delete_prescription(&conn, &rx.id).unwrap();
        assert!(get_prescription(&conn, &rx.id).unwrap().is_none());
    }
}
