use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{enum_col, format_date, format_ts, opt_date_col, ts_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::User;
use crate::scoping::Scope;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, first_name, last_name,
     phone, date_of_birth, address, city, state, zip_code, profile_picture, is_active,
     created_at, updated_at";

pub fn insert_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, role, first_name, last_name,
         phone, date_of_birth, address, city, state, zip_code, profile_picture, is_active,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            user.id.to_string(),
            user.username,
            user.email,
            user.password_hash,
            user.role.as_str(),
            user.first_name,
            user.last_name,
            user.phone,
            user.date_of_birth.as_ref().map(format_date),
            user.address,
            user.city,
            user.state,
            user.zip_code,
            user.profile_picture,
            user.is_active,
            format_ts(&user.created_at),
            format_ts(&user.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let user = conn
        .query_row(&sql, params![id.to_string()], row_to_user)
        .optional()?;
    Ok(user)
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
    let user = conn
        .query_row(&sql, params![username], row_to_user)
        .optional()?;
    Ok(user)
}

/// Case-insensitive email uniqueness check, optionally ignoring one account.
pub fn email_taken(conn: &Connection, email: &str, except: Option<&Uuid>) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE LOWER(email) = LOWER(?1) AND id IS NOT ?2",
        params![email.trim(), except.map(|id| id.to_string())],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn username_taken(conn: &Connection, username: &str, except: Option<&Uuid>) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1 AND id IS NOT ?2",
        params![username, except.map(|id| id.to_string())],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Users visible under `scope`, by username.
pub fn list_users(conn: &Connection, scope: &Scope) -> Result<Vec<User>, DatabaseError> {
    let (filter, args) = scope.sql_filter("id");
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} ORDER BY username");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_user)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Rewrites the editable account fields. Username, role and password are
/// changed through their own paths.
pub fn update_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE users SET email = ?2, first_name = ?3, last_name = ?4, phone = ?5,
         date_of_birth = ?6, address = ?7, city = ?8, state = ?9, zip_code = ?10,
         profile_picture = ?11, is_active = ?12, updated_at = ?13
         WHERE id = ?1",
        params![
            user.id.to_string(),
            user.email,
            user.first_name,
            user.last_name,
            user.phone,
            user.date_of_birth.as_ref().map(format_date),
            user.address,
            user.city,
            user.state,
            user.zip_code,
            user.profile_picture,
            user.is_active,
            format_ts(&user.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(not_found(&user.id));
    }
    Ok(())
}

pub fn update_password_hash(conn: &Connection, id: &Uuid, hash: &str) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), hash, format_ts(&chrono::Utc::now())],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

pub fn delete_user(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "User".into(),
        id: id.to_string(),
    }
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: enum_col(row, 4)?,
        first_name: row.get(5)?,
        last_name: row.get(6)?,
        phone: row.get(7)?,
        date_of_birth: opt_date_col(row, 8)?,
        address: row.get(9)?,
        city: row.get(10)?,
        state: row.get(11)?,
        zip_code: row.get(12)?,
        profile_picture: row.get(13)?,
        is_active: row.get(14)?,
        created_at: ts_col(row, 15)?,
        updated_at: ts_col(row, 16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::models::enums::Role;

    #[test]
    fn insert_and_fetch_by_id_and_username() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);

        let by_id = get_user(&conn, &user.id).unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        assert_eq!(by_id.role, Role::Patient);

        let by_name = get_user_by_username(&conn, "alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(get_user_by_username(&conn, "bob").unwrap().is_none());
    }

    #[test]
    fn email_check_is_case_insensitive_and_skips_self() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);
        assert!(email_taken(&conn, "ALICE@example.com", None).unwrap());
        assert!(!email_taken(&conn, "alice@example.com", Some(&user.id)).unwrap());
        assert!(username_taken(&conn, "alice", None).unwrap());
        assert!(!username_taken(&conn, "alice", Some(&user.id)).unwrap());
    }

    #[test]
    fn duplicate_username_is_unique_violation() {
        let conn = test_db();
        let user = make_user(&conn, "alice", Role::Patient);
        let mut dup = user.clone();
        dup.id = Uuid::new_v4();
        dup.email = "other@example.com".into();
        let err = insert_user(&conn, &dup).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn list_respects_scope() {
        let conn = test_db();
        let alice = make_user(&conn, "alice", Role::Patient);
        make_user(&conn, "bob", Role::Doctor);
        make_user(&conn, "carol", Role::Admin);

        assert_eq!(list_users(&conn, &Scope::All).unwrap().len(), 3);
        let own = list_users(&conn, &Scope::Only(vec![alice.id])).unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].id, alice.id);
        assert!(list_users(&conn, &Scope::Nothing).unwrap().is_empty());
    }

    #[test]
    fn update_and_delete() {
        let conn = test_db();
        let mut user = make_user(&conn, "alice", Role::Patient);
        user.first_name = "Alice".into();
        user.date_of_birth = chrono::NaiveDate::from_ymd_opt(1990, 5, 1);
        update_user(&conn, &user).unwrap();
        let fetched = get_user(&conn, &user.id).unwrap().unwrap();
        assert_eq!(fetched.first_name, "Alice");
        assert_eq!(fetched.date_of_birth, user.date_of_birth);

        update_password_hash(&conn, &user.id, "pbkdf2$2$AA==$AA==").unwrap();
        let fetched = get_user(&conn, &user.id).unwrap().unwrap();
        assert_eq!(fetched.password_hash, "pbkdf2$2$AA==$AA==");

        delete_user(&conn, &user.id).unwrap();
        assert!(matches!(
            delete_user(&conn, &user.id),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
