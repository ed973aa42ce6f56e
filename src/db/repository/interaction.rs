use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{enum_col, format_ts, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::DrugInteraction;

const COLUMNS: &str =
    "id, medication_1, medication_2, severity, description, mechanism, recommendation, created_at";

pub fn insert_interaction(conn: &Connection, interaction: &DrugInteraction) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO drug_interactions (id, medication_1, medication_2, severity, description,
         mechanism, recommendation, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            interaction.id.to_string(),
            interaction.medication_1,
            interaction.medication_2,
            interaction.severity.as_str(),
            interaction.description,
            interaction.mechanism,
            interaction.recommendation,
            format_ts(&interaction.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_interaction(conn: &Connection, id: &Uuid) -> Result<Option<DrugInteraction>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM drug_interactions WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_interaction)
        .optional()?)
}

pub fn list_interactions(conn: &Connection) -> Result<Vec<DrugInteraction>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM drug_interactions ORDER BY medication_1, medication_2");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_interaction)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// First recorded interaction between two names, in either order.
/// Names are compared trimmed and case-insensitively.
pub fn find_interaction(conn: &Connection, a: &str, b: &str) -> Result<Option<DrugInteraction>, DatabaseError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM drug_interactions
         WHERE (LOWER(TRIM(medication_1)) = LOWER(?1) AND LOWER(TRIM(medication_2)) = LOWER(?2))
            OR (LOWER(TRIM(medication_1)) = LOWER(?2) AND LOWER(TRIM(medication_2)) = LOWER(?1))
         ORDER BY created_at
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![a.trim(), b.trim()], row_to_interaction)
        .optional()?)
}

fn row_to_interaction(row: &Row) -> rusqlite::Result<DrugInteraction> {
    Ok(DrugInteraction {
        id: uuid_col(row, 0)?,
        medication_1: row.get(1)?,
        medication_2: row.get(2)?,
        severity: enum_col(row, 3)?,
        description: row.get(4)?,
        mechanism: row.get(5)?,
        recommendation: row.get(6)?,
        created_at: ts_col(row, 7)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_interaction(a: &str, b: &str) -> DrugInteraction {
    DrugInteraction {
        id: Uuid::new_v4(),
        medication_1: a.into(),
        medication_2: b.into(),
        severity: crate::models::enums::InteractionSeverity::Major,
        description: format!("{a} with {b} raises bleeding risk"),
        mechanism: String::new(),
        recommendation: "Avoid combination".into(),
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::test_db;

    #[test]
    fn lookup_is_symmetric_and_case_insensitive() {
        let conn = test_db();
        let stored = sample_interaction("Warfarin", "Aspirin");
        insert_interaction(&conn, &stored).unwrap();

        let forward = find_interaction(&conn, "warfarin", "ASPIRIN").unwrap().unwrap();
        let backward = find_interaction(&conn, " aspirin ", "Warfarin").unwrap().unwrap();
        assert_eq!(forward.id, stored.id);
        assert_eq!(backward.id, stored.id);
    }

    #[test]
    fn unrelated_pair_is_none() {
        let conn = test_db();
        insert_interaction(&conn, &sample_interaction("Warfarin", "Aspirin")).unwrap();
        assert!(find_interaction(&conn, "Warfarin", "Metformin").unwrap().is_none());
        assert_eq!(list_interactions(&conn).unwrap().len(), 1);
    }
}
