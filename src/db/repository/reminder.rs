use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{enum_col, format_time, format_ts, json_col, opt_ts_col, time_col, to_json, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::MedicationReminder;
use crate::scoping::MedicationScope;

const COLUMNS: &str = "r.id, r.medication_id, r.reminder_time, r.days_of_week,
     r.notification_type, r.is_active, r.last_triggered, r.next_trigger, r.created_at,
     r.updated_at";

pub fn insert_reminder(conn: &Connection, reminder: &MedicationReminder) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medication_reminders (id, medication_id, reminder_time, days_of_week,
         notification_type, is_active, last_triggered, next_trigger, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            reminder.id.to_string(),
            reminder.medication_id.to_string(),
            format_time(&reminder.reminder_time),
            to_json(&reminder.days_of_week),
            reminder.notification_type.as_str(),
            reminder.is_active,
            reminder.last_triggered.as_ref().map(format_ts),
            reminder.next_trigger.as_ref().map(format_ts),
            format_ts(&reminder.created_at),
            format_ts(&reminder.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_reminder(conn: &Connection, id: &Uuid) -> Result<Option<MedicationReminder>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM medication_reminders r WHERE r.id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_reminder)
        .optional()?)
}

/// Reminders whose medication belongs to a patient in `scope`, by time of day.
pub fn list_reminders(conn: &Connection, scope: &MedicationScope) -> Result<Vec<MedicationReminder>, DatabaseError> {
    let (filter, args) = scope.patients.sql_filter("pm.patient_id");
    let active = if scope.active_only { " AND r.is_active = 1" } else { "" };
    let sql = format!(
        "SELECT {COLUMNS} FROM medication_reminders r
         JOIN patient_medications pm ON pm.id = r.medication_id
         WHERE {filter}{active}
         ORDER BY r.reminder_time, r.created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_reminder)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn list_reminders_for_medication(
    conn: &Connection,
    medication_id: &Uuid,
) -> Result<Vec<MedicationReminder>, DatabaseError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM medication_reminders r
         WHERE r.medication_id = ?1 ORDER BY r.reminder_time"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![medication_id.to_string()], row_to_reminder)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_reminder(conn: &Connection, reminder: &MedicationReminder) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE medication_reminders SET reminder_time = ?2, days_of_week = ?3,
         notification_type = ?4, is_active = ?5, next_trigger = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            reminder.id.to_string(),
            format_time(&reminder.reminder_time),
            to_json(&reminder.days_of_week),
            reminder.notification_type.as_str(),
            reminder.is_active,
            reminder.next_trigger.as_ref().map(format_ts),
            format_ts(&reminder.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&reminder.id));
    }
    Ok(())
}

/// Stamps a firing and stores the following trigger instant.
pub fn record_trigger(
    conn: &Connection,
    id: &Uuid,
    triggered_at: &DateTime<Utc>,
    next: Option<&DateTime<Utc>>,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE medication_reminders SET last_triggered = ?2, next_trigger = ?3, updated_at = ?2
         WHERE id = ?1",
        params![id.to_string(), format_ts(triggered_at), next.map(format_ts)],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

/// Turns off every reminder of a medication. Returns how many changed.
pub fn deactivate_reminders_for_medication(conn: &Connection, medication_id: &Uuid) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE medication_reminders SET is_active = 0, updated_at = ?2
         WHERE medication_id = ?1 AND is_active = 1",
        params![medication_id.to_string(), format_ts(&Utc::now())],
    )?;
    Ok(changed)
}

pub fn delete_reminder(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM medication_reminders WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "MedicationReminder".into(),
        id: id.to_string(),
    }
}

fn row_to_reminder(row: &Row) -> rusqlite::Result<MedicationReminder> {
    Ok(MedicationReminder {
        id: uuid_col(row, 0)?,
        medication_id: uuid_col(row, 1)?,
        reminder_time: time_col(row, 2)?,
        days_of_week: json_col(row, 3)?,
        notification_type: enum_col(row, 4)?,
        is_active: row.get(5)?,
        last_triggered: opt_ts_col(row, 6)?,
        next_trigger: opt_ts_col(row, 7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_reminder(medication_id: Uuid, hour: u32) -> MedicationReminder {
    let now = Utc::now();
    MedicationReminder {
        id: Uuid::new_v4(),
        medication_id,
        reminder_time: chrono::NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        days_of_week: (0..7).collect(),
        notification_type: crate::models::enums::NotificationType::Push,
        is_active: true,
        last_triggered: None,
        next_trigger: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::db::repository::{insert_patient_medication, sample_medication};
    use crate::models::enums::Role;
    use crate::scoping::Scope;

    #[test]
    fn days_and_time_round_trip() {
        let conn = test_db();
        let pat = make_user(&conn, "pat", Role::Patient);
        let med = sample_medication(pat.id, "Metformin");
        insert_patient_medication(&conn, &med).unwrap();

        let mut reminder = sample_reminder(med.id, 21);
        reminder.days_of_week = vec![0, 2, 4];
        insert_reminder(&conn, &reminder).unwrap();

        let fetched = get_reminder(&conn, &reminder.id).unwrap().unwrap();
        assert_eq!(fetched.days_of_week, vec![0, 2, 4]);
        assert_eq!(fetched.reminder_time, reminder.reminder_time);
    }

    #[test]
    fn scoped_list_joins_through_medication() {
        let conn = test_db();
        let a = make_user(&conn, "a", Role::Patient);
        let b = make_user(&conn, "b", Role::Patient);
        let med_a = sample_medication(a.id, "A-med");
        let med_b = sample_medication(b.id, "B-med");
        insert_patient_medication(&conn, &med_a).unwrap();
        insert_patient_medication(&conn, &med_b).unwrap();

        insert_reminder(&conn, &sample_reminder(med_a.id, 21)).unwrap();
        insert_reminder(&conn, &sample_reminder(med_a.id, 9)).unwrap();
        insert_reminder(&conn, &sample_reminder(med_b.id, 9)).unwrap();

        let own = list_reminders(
            &conn,
            &MedicationScope { patients: Scope::Only(vec![a.id]), active_only: true },
        )
        .unwrap();
        assert_eq!(own.len(), 2);
        assert!(own[0].reminder_time < own[1].reminder_time);

        let nothing = list_reminders(
            &conn,
            &MedicationScope { patients: Scope::Nothing, active_only: false },
        )
        .unwrap();
        assert!(nothing.is_empty());
    }

    #[test]
    fn deactivate_cascade_and_trigger_stamp() {
        let conn = test_db();
        let pat = make_user(&conn, "pat", Role::Patient);
        let med = sample_medication(pat.id, "Metformin");
        insert_patient_medication(&conn, &med).unwrap();
        let first = sample_reminder(med.id, 9);
        insert_reminder(&conn, &first).unwrap();
        insert_reminder(&conn, &sample_reminder(med.id, 21)).unwrap();

        let now = Utc::now();
        record_trigger(&conn, &first.id, &now, None).unwrap();
        assert!(get_reminder(&conn, &first.id).unwrap().unwrap().last_triggered.is_some());

        assert_eq!(deactivate_reminders_for_medication(&conn, &med.id).unwrap(), 2);
        assert!(list_reminders_for_medication(&conn, &med.id)
            .unwrap()
            .iter()
            .all(|r| !r.is_active));
    }
}
