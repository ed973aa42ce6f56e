use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{enum_col, format_ts, opt_ts_col, opt_uuid_col, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::MedicationLog;
use crate::scoping::Scope;

const COLUMNS: &str = "l.id, l.medication_id, l.reminder_id, l.scheduled_time, l.actual_time,
     l.status, l.dosage_taken, l.notes, l.confirmed_by, l.confirmation_method, l.created_at";

pub fn insert_log(conn: &Connection, log: &MedicationLog) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medication_logs (id, medication_id, reminder_id, scheduled_time,
         actual_time, status, dosage_taken, notes, confirmed_by, confirmation_method, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            log.id.to_string(),
            log.medication_id.to_string(),
            log.reminder_id.map(|id| id.to_string()),
            format_ts(&log.scheduled_time),
            log.actual_time.as_ref().map(format_ts),
            log.status.as_str(),
            log.dosage_taken,
            log.notes,
            log.confirmed_by.map(|id| id.to_string()),
            log.confirmation_method,
            format_ts(&log.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_log(conn: &Connection, id: &Uuid) -> Result<Option<MedicationLog>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM medication_logs l WHERE l.id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_log)
        .optional()?)
}

/// Logs of patients within `scope`, newest scheduled first. `window` is a
/// half-open `[from, to)` range on the scheduled time.
pub fn list_logs(
    conn: &Connection,
    scope: &Scope,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<MedicationLog>, DatabaseError> {
    let (filter, mut args) = scope.sql_filter("pm.patient_id");
    let mut sql = format!(
        "SELECT {COLUMNS} FROM medication_logs l
         JOIN patient_medications pm ON pm.id = l.medication_id
         WHERE {filter}"
    );
    if let Some((from, to)) = window {
        sql.push_str(" AND l.scheduled_time >= ? AND l.scheduled_time < ?");
        args.push(format_ts(&from));
        args.push(format_ts(&to));
    }
    sql.push_str(" ORDER BY l.scheduled_time DESC, l.created_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_log)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn list_logs_for_medication(conn: &Connection, medication_id: &Uuid) -> Result<Vec<MedicationLog>, DatabaseError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM medication_logs l
         WHERE l.medication_id = ?1 ORDER BY l.scheduled_time DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![medication_id.to_string()], row_to_log)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Every log of one patient scheduled at or after `since`.
pub fn list_logs_for_patient_since(
    conn: &Connection,
    patient_id: &Uuid,
    since: &DateTime<Utc>,
) -> Result<Vec<MedicationLog>, DatabaseError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM medication_logs l
         JOIN patient_medications pm ON pm.id = l.medication_id
         WHERE pm.patient_id = ?1 AND l.scheduled_time >= ?2
         ORDER BY l.scheduled_time DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![patient_id.to_string(), format_ts(since)], row_to_log)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn delete_log(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute("DELETE FROM medication_logs WHERE id = ?1", params![id.to_string()])?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "MedicationLog".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn row_to_log(row: &Row) -> rusqlite::Result<MedicationLog> {
    Ok(MedicationLog {
        id: uuid_col(row, 0)?,
        medication_id: uuid_col(row, 1)?,
        reminder_id: opt_uuid_col(row, 2)?,
        scheduled_time: ts_col(row, 3)?,
        actual_time: opt_ts_col(row, 4)?,
        status: enum_col(row, 5)?,
        dosage_taken: row.get(6)?,
        notes: row.get(7)?,
        confirmed_by: opt_uuid_col(row, 8)?,
        confirmation_method: row.get(9)?,
        created_at: ts_col(row, 10)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_log(
    medication_id: Uuid,
    status: crate::models::enums::LogStatus,
    scheduled_time: DateTime<Utc>,
) -> MedicationLog {
    MedicationLog {
        id: Uuid::new_v4(),
        medication_id,
        reminder_id: None,
        scheduled_time,
        actual_time: Some(scheduled_time),
        status,
        dosage_taken: String::new(),
        notes: String::new(),
        confirmed_by: None,
        confirmation_method: "manual".into(),
        created_at: Utc::now(),
    }
}
