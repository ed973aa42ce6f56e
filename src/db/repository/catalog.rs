use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_ts, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::Medication;

const COLUMNS: &str = "id, name, generic_name, brand_name, dosage_form, strength, drug_class,
     atc_code, pregnancy_category, controlled_substance, requires_prescription,
     created_at, updated_at";

pub fn insert_catalog_medication(conn: &Connection, med: &Medication) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, name, generic_name, brand_name, dosage_form, strength,
         drug_class, atc_code, pregnancy_category, controlled_substance, requires_prescription,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            med.id.to_string(),
            med.name,
            med.generic_name,
            med.brand_name,
            med.dosage_form,
            med.strength,
            med.drug_class,
            med.atc_code,
            med.pregnancy_category,
            med.controlled_substance,
            med.requires_prescription,
            format_ts(&med.created_at),
            format_ts(&med.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_catalog_medication(conn: &Connection, id: &Uuid) -> Result<Option<Medication>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM medications WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_medication)
        .optional()?)
}

/// Catalog entries by name. `search` matches name, generic or brand name,
/// case-insensitively.
pub fn search_catalog(conn: &Connection, search: Option<&str>) -> Result<Vec<Medication>, DatabaseError> {
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));
    let sql = format!(
        "SELECT {COLUMNS} FROM medications
         WHERE ?1 IS NULL
            OR LOWER(name) LIKE LOWER(?1)
            OR LOWER(generic_name) LIKE LOWER(?1)
            OR LOWER(brand_name) LIKE LOWER(?1)
         ORDER BY name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![pattern], row_to_medication)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

fn row_to_medication(row: &Row) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        generic_name: row.get(2)?,
        brand_name: row.get(3)?,
        dosage_form: row.get(4)?,
        strength: row.get(5)?,
        drug_class: row.get(6)?,
        atc_code: row.get(7)?,
        pregnancy_category: row.get(8)?,
        controlled_substance: row.get(9)?,
        requires_prescription: row.get(10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}
