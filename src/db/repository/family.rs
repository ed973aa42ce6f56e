use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{enum_col, format_date, format_ts, opt_date_col, opt_uuid_col, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::FamilyMember;

const COLUMNS: &str = "id, main_user_id, name, relationship, email, phone, date_of_birth,
     health_profile_id, can_view, can_edit, is_emergency_contact, emergency_contact_priority,
     created_at, updated_at";

pub fn insert_family_member(conn: &Connection, member: &FamilyMember) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO family_members (id, main_user_id, name, relationship, email, phone,
         date_of_birth, health_profile_id, can_view, can_edit, is_emergency_contact,
         emergency_contact_priority, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            member.id.to_string(),
            member.main_user_id.to_string(),
            member.name,
            member.relationship.as_str(),
            member.email,
            member.phone,
            member.date_of_birth.as_ref().map(format_date),
            member.health_profile_id.map(|id| id.to_string()),
            member.can_view,
            member.can_edit,
            member.is_emergency_contact,
            member.emergency_contact_priority,
            format_ts(&member.created_at),
            format_ts(&member.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_family_member(conn: &Connection, id: &Uuid) -> Result<Option<FamilyMember>, DatabaseError> {
    let sql = format!("SELECT {COLUMNS} FROM family_members WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], row_to_family_member)
        .optional()?)
}

/// A user's contacts: emergency contacts first, then by priority, then by name.
pub fn list_family_members(conn: &Connection, main_user_id: &Uuid) -> Result<Vec<FamilyMember>, DatabaseError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM family_members WHERE main_user_id = ?1
         ORDER BY is_emergency_contact DESC, emergency_contact_priority ASC, name ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![main_user_id.to_string()], row_to_family_member)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Users who list `email` as a contact allowed to view their records.
pub fn users_sharing_with(conn: &Connection, email: &str) -> Result<Vec<Uuid>, DatabaseError> {
    users_granting(conn, email, "can_view = 1")
}

/// Users who list `email` as a contact allowed to view and change their records.
pub fn users_delegating_edits_to(conn: &Connection, email: &str) -> Result<Vec<Uuid>, DatabaseError> {
    users_granting(conn, email, "can_view = 1 AND can_edit = 1")
}

fn users_granting(conn: &Connection, email: &str, grant: &str) -> Result<Vec<Uuid>, DatabaseError> {
    if email.trim().is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT DISTINCT main_user_id FROM family_members
         WHERE LOWER(email) = LOWER(?1) AND {grant}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![email.trim()], |row| uuid_col(row, 0))?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// The member already linked to `health_profile_id`, if any.
pub fn member_linked_to(conn: &Connection, health_profile_id: &Uuid) -> Result<Option<Uuid>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id FROM family_members WHERE health_profile_id = ?1",
            params![health_profile_id.to_string()],
            |row| uuid_col(row, 0),
        )
        .optional()?)
}

pub fn update_family_member(conn: &Connection, member: &FamilyMember) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE family_members SET name = ?2, relationship = ?3, email = ?4, phone = ?5,
         date_of_birth = ?6, health_profile_id = ?7, can_view = ?8, can_edit = ?9,
         is_emergency_contact = ?10, emergency_contact_priority = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            member.id.to_string(),
            member.name,
            member.relationship.as_str(),
            member.email,
            member.phone,
            member.date_of_birth.as_ref().map(format_date),
            member.health_profile_id.map(|id| id.to_string()),
            member.can_view,
            member.can_edit,
            member.is_emergency_contact,
            member.emergency_contact_priority,
            format_ts(&member.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&member.id));
    }
    Ok(())
}

pub fn delete_family_member(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM family_members WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "FamilyMember".into(),
        id: id.to_string(),
    }
}

fn row_to_family_member(row: &Row) -> rusqlite::Result<FamilyMember> {
    Ok(FamilyMember {
        id: uuid_col(row, 0)?,
        main_user_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        relationship: enum_col(row, 3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        date_of_birth: opt_date_col(row, 6)?,
        health_profile_id: opt_uuid_col(row, 7)?,
        can_view: row.get(8)?,
        can_edit: row.get(9)?,
        is_emergency_contact: row.get(10)?,
        emergency_contact_priority: row.get(11)?,
        created_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_member(main_user_id: Uuid, name: &str) -> FamilyMember {
    let now = chrono::Utc::now();
    FamilyMember {
        id: Uuid::new_v4(),
        main_user_id,
        name: name.into(),
        relationship: crate::models::enums::Relationship::Sibling,
        email: String::new(),
        phone: String::new(),
        date_of_birth: None,
        health_profile_id: None,
        can_view: false,
        can_edit: false,
        is_emergency_contact: false,
        emergency_contact_priority: 1,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::models::enums::Role;

    #[test]
    fn list_orders_emergency_then_priority_then_name() {
        let conn = test_db();
        let owner = make_user(&conn, "owner", Role::Patient);

        let mut zed = sample_member(owner.id, "Zed");
        zed.is_emergency_contact = true;
        zed.emergency_contact_priority = 1;
        let mut amy = sample_member(owner.id, "Amy");
        amy.is_emergency_contact = true;
        amy.emergency_contact_priority = 2;
        let bob = sample_member(owner.id, "Bob");
        let abe = sample_member(owner.id, "Abe");

        for m in [&bob, &amy, &abe, &zed] {
            insert_family_member(&conn, m).unwrap();
        }

        let names: Vec<String> = list_family_members(&conn, &owner.id)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Zed", "Amy", "Abe", "Bob"]);
    }

    #[test]
    fn sharing_requires_view_permission_and_matching_email() {
        let conn = test_db();
        let owner = make_user(&conn, "owner", Role::Patient);
        let other = make_user(&conn, "other", Role::Patient);

        let mut viewer = sample_member(owner.id, "Carer");
        viewer.email = "Carer@Example.com".into();
        viewer.can_view = true;
        insert_family_member(&conn, &viewer).unwrap();

        let mut hidden = sample_member(other.id, "Carer");
        hidden.email = "carer@example.com".into();
        insert_family_member(&conn, &hidden).unwrap();

        let shared = users_sharing_with(&conn, "carer@example.com").unwrap();
        assert_eq!(shared, vec![owner.id]);
        assert!(users_sharing_with(&conn, "").unwrap().is_empty());
    }

    #[test]
    fn edit_delegation_needs_both_grants() {
        let conn = test_db();
        let viewer_only = make_user(&conn, "viewer_only", Role::Patient);
        let delegating = make_user(&conn, "delegating", Role::Patient);

        let mut read = sample_member(viewer_only.id, "Carer");
        read.email = "carer@example.com".into();
        read.can_view = true;
        insert_family_member(&conn, &read).unwrap();

        let mut write = sample_member(delegating.id, "Carer");
        write.email = "CARER@example.com".into();
        write.can_view = true;
        write.can_edit = true;
        insert_family_member(&conn, &write).unwrap();

        assert_eq!(
            users_delegating_edits_to(&conn, "carer@example.com").unwrap(),
            vec![delegating.id]
        );
        assert_eq!(users_sharing_with(&conn, "carer@example.com").unwrap().len(), 2);
    }

    #[test]
    fn update_then_delete() {
        let conn = test_db();
        let owner = make_user(&conn, "owner", Role::Patient);
        let mut member = sample_member(owner.id, "Sam");
        insert_family_member(&conn, &member).unwrap();

        member.emergency_contact_priority = 4;
        member.phone = "5551234567".into();
        update_family_member(&conn, &member).unwrap();
        let fetched = get_family_member(&conn, &member.id).unwrap().unwrap();
        assert_eq!(fetched.emergency_contact_priority, 4);
        assert_eq!(fetched.phone, "5551234567");

        delete_family_member(&conn, &member.id).unwrap();
        assert!(get_family_member(&conn, &member.id).unwrap().is_none());
    }
}
