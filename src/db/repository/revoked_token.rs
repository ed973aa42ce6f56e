use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::format_ts;
use crate::db::DatabaseError;

/// Records a refresh token id as revoked. Revoking twice is a no-op.
pub fn revoke_token(
    conn: &Connection,
    jti: &str,
    user_id: &Uuid,
    expires_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO revoked_tokens (jti, user_id, expires_at, revoked_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![jti, user_id.to_string(), format_ts(expires_at), format_ts(&Utc::now())],
    )?;
    Ok(())
}

pub fn is_token_revoked(conn: &Connection, jti: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM revoked_tokens WHERE jti = ?1",
        params![jti],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Drops entries for tokens that have expired anyway.
pub fn purge_expired_revocations(conn: &Connection, now: &DateTime<Utc>) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM revoked_tokens WHERE expires_at < ?1",
        params![format_ts(now)],
    )?;
    Ok(removed)
}
