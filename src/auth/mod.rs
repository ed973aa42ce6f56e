//! Credentials and session tokens.
//!
//! Passwords are PBKDF2-HMAC-SHA256 with a per-user salt. Sessions are a
//! short-lived signed access token plus a longer refresh token; refresh
//! tokens can be revoked (logout) by recording their `jti`.

pub mod password;
pub mod tokens;

use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::Role;
use crate::models::User;

pub use password::{hash_password, verify_password};
pub use tokens::{Claims, TokenIssuer, TokenPair, TokenType};

/// Who is making a request, as established by a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub email: String,
}

impl Identity {
    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No active account found with the given credentials")]
    InvalidCredentials,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token is invalid: {0}")]
    TokenInvalid(String),

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Expected a {expected} token")]
    WrongTokenType { expected: &'static str },

    #[error("Stored password hash is malformed")]
    MalformedHash,

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Checks a username/password pair against the stored account.
/// Unknown users, wrong passwords and inactive accounts are indistinguishable.
pub fn authenticate(conn: &rusqlite::Connection, username: &str, password: &str) -> Result<User, AuthError> {
    let Some(user) = crate::db::repository::get_user_by_username(conn, username.trim())? else {
        tracing::warn!(username, "login rejected: unknown user");
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &user.password_hash)? {
        tracing::warn!(user_id = %user.id, "login rejected: wrong password");
        return Err(AuthError::InvalidCredentials);
    }
    if !user.is_active {
        tracing::warn!(user_id = %user.id, "login rejected: inactive account");
        return Err(AuthError::InvalidCredentials);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::db::repository::{update_password_hash, update_user};

    #[test]
    fn authenticate_checks_password_and_active_flag() {
        let conn = test_db();
        let mut user = make_user(&conn, "alice", Role::Patient);
        update_password_hash(&conn, &user.id, &hash_password("s3cret-pass")).unwrap();

        let ok = authenticate(&conn, "alice", "s3cret-pass").unwrap();
        assert_eq!(ok.id, user.id);
        assert!(matches!(
            authenticate(&conn, "alice", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&conn, "nobody", "s3cret-pass"),
            Err(AuthError::InvalidCredentials)
        ));

        user.is_active = false;
        update_user(&conn, &user).unwrap();
        assert!(matches!(
            authenticate(&conn, "alice", "s3cret-pass"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn identity_from_user_copies_claim_fields() {
        let conn = test_db();
        let user = make_user(&conn, "doc", Role::Doctor);
        let identity = Identity::from(&user);
        assert_eq!(identity.user_id, user.id);
        assert!(identity.is(Role::Doctor));
        assert!(!identity.is_admin());
    }
}
