//! Account registration, lookup and maintenance.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, Identity};
use crate::db::repository;
use crate::lifecycle::ensure_role_profiles;
use crate::metrics::user_profile_completion;
use crate::models::enums::Role;
use crate::models::User;
use crate::scoping;
use crate::validation::{
    normalize_email, normalize_phone, nullable, or_not_found, require, DomainError, FieldErrors,
};

pub const MIN_PASSWORD_LEN: usize = 8;

static USERNAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w.@+-]{1,150}$").unwrap());

// ═══════════════════════════════════════════
// Request and view types
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    #[serde(alias = "user_type")]
    pub role: Role,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip_code: String,
}

/// Partial account update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub date_of_birth: Option<Option<NaiveDate>>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub profile_picture: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub profile_picture: Option<String>,
    pub is_active: bool,
    pub profile_completion: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            full_name: user.full_name(),
            profile_completion: user_profile_completion(&user),
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            date_of_birth: user.date_of_birth,
            address: user.address,
            city: user.city,
            state: user.state,
            zip_code: user.zip_code,
            profile_picture: user.profile_picture,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

// ═══════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════

fn check_password_strength(password: &str, field: &str, errors: &mut FieldErrors) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            field,
            format!("This password is too short. It must contain at least {MIN_PASSWORD_LEN} characters."),
        );
    }
}

/// Creates an account and its role profiles in one transaction.
/// Only an admin requester may create another admin.
pub fn register(conn: &Connection, requester: Option<&Identity>, reg: Registration) -> Result<User, DomainError> {
    let mut errors = FieldErrors::new();

    let username = reg.username.trim().to_string();
    require(&username, "username", &mut errors);
    if !username.is_empty() && !USERNAME_PATTERN.is_match(&username) {
        errors.add(
            "username",
            "Enter a valid username. Letters, digits and @/./+/-/_ only.",
        );
    }
    let email = normalize_email(&reg.email, "email", &mut errors);
    let phone = normalize_phone(&reg.phone, "phone", &mut errors);

    if reg.password != reg.password2 {
        errors.add("password", "Passwords do not match.");
    }
    check_password_strength(&reg.password, "password", &mut errors);

    if reg.role == Role::Admin && !requester.is_some_and(Identity::is_admin) {
        errors.add("role", "Only administrators can create admin accounts.");
    }

    if !username.is_empty() && repository::username_taken(conn, &username, None)? {
        errors.add("username", "A user with that username already exists.");
    }
    if !email.is_empty() && repository::email_taken(conn, &email, None)? {
        errors.add("email", "A user with this email already exists.");
    }
    errors.into_result()?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username,
        email,
        password_hash: hash_password(&reg.password),
        role: reg.role,
        first_name: reg.first_name.trim().to_string(),
        last_name: reg.last_name.trim().to_string(),
        phone,
        date_of_birth: reg.date_of_birth,
        address: reg.address,
        city: reg.city,
        state: reg.state,
        zip_code: reg.zip_code,
        profile_picture: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let tx = conn.unchecked_transaction()?;
    repository::insert_user(&tx, &user).map_err(|e| {
        if e.is_unique_violation() {
            DomainError::field("username", "A user with that username or email already exists.")
        } else {
            e.into()
        }
    })?;
    ensure_role_profiles(&tx, &user)?;
    tx.commit()?;

    tracing::info!(user_id = %user.id, role = %user.role, "account registered");
    Ok(user)
}

/// The user with `id`, if the requester's scope includes it.
pub fn visible_user(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<User, DomainError> {
    if !scoping::users(identity).contains(id) {
        return Err(DomainError::NotFound("User"));
    }
    repository::get_user(conn, id)?.ok_or(DomainError::NotFound("User"))
}

pub fn list_users(conn: &Connection, identity: &Identity) -> Result<Vec<UserView>, DomainError> {
    let users = repository::list_users(conn, &scoping::users(identity))?;
    Ok(users.into_iter().map(UserView::from).collect())
}

pub fn update_user(conn: &Connection, mut user: User, changes: UserChanges) -> Result<User, DomainError> {
    let mut errors = FieldErrors::new();

    if let Some(email) = changes.email {
        let email = normalize_email(&email, "email", &mut errors);
        if !email.is_empty() && repository::email_taken(conn, &email, Some(&user.id))? {
            errors.add("email", "A user with this email already exists.");
        }
        user.email = email;
    }
    if let Some(phone) = changes.phone {
        user.phone = normalize_phone(&phone, "phone", &mut errors);
    }
    errors.into_result()?;

    if let Some(v) = changes.first_name {
        user.first_name = v.trim().to_string();
    }
    if let Some(v) = changes.last_name {
        user.last_name = v.trim().to_string();
    }
    if let Some(v) = changes.date_of_birth {
        user.date_of_birth = v;
    }
    if let Some(v) = changes.address {
        user.address = v;
    }
    if let Some(v) = changes.city {
        user.city = v;
    }
    if let Some(v) = changes.state {
        user.state = v;
    }
    if let Some(v) = changes.zip_code {
        user.zip_code = v;
    }
    if let Some(v) = changes.profile_picture {
        user.profile_picture = v;
    }
    user.updated_at = Utc::now();

    repository::update_user(conn, &user)?;
    Ok(user)
}

pub fn change_password(conn: &Connection, identity: &Identity, change: PasswordChange) -> Result<(), DomainError> {
    let user = repository::get_user(conn, &identity.user_id)?.ok_or(DomainError::NotFound("User"))?;

    let mut errors = FieldErrors::new();
    if !verify_password(&change.old_password, &user.password_hash)? {
        errors.add("old_password", "Wrong password.");
    }
    check_password_strength(&change.new_password, "new_password", &mut errors);
    errors.into_result()?;

    repository::update_password_hash(conn, &user.id, &hash_password(&change.new_password))?;
    tracing::info!(user_id = %user.id, "password changed");
    Ok(())
}

pub fn delete_user(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_user(conn, id).map_err(or_not_found("User"))?;
    tracing::info!(user_id = %id, "account deleted");
    Ok(())
}

#[cfg(test)]
pub(crate) fn registration(username: &str, role: Role) -> Registration {
    Registration {
        username: username.into(),
        email: format!("{username}@example.com"),
        password: "long-enough-pw".into(),
        password2: "long-enough-pw".into(),
        role,
        first_name: String::new(),
        last_name: String::new(),
        phone: String::new(),
        date_of_birth: None,
        address: String::new(),
        city: String::new(),
        state: String::new(),
        zip_code: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::test_db;

    fn field_errors(err: DomainError) -> FieldErrors {
        match err {
            DomainError::Validation(errors) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn patient_registration_creates_profiles() {
        let conn = test_db();
        let user = register(&conn, None, registration("pat", Role::Patient)).unwrap();
        assert!(repository::get_patient_profile_by_user(&conn, &user.id).unwrap().is_some());
        assert!(repository::get_health_profile_by_user(&conn, &user.id).unwrap().is_some());
        assert!(verify_password("long-enough-pw", &user.password_hash).unwrap());
    }

    #[test]
    fn mismatched_passwords_reported_on_password_field() {
        let conn = test_db();
        let mut reg = registration("pat", Role::Patient);
        reg.password2 = "something-else".into();
        let errors = field_errors(register(&conn, None, reg).unwrap_err());
        assert_eq!(errors.get("password").unwrap()[0], "Passwords do not match.");
    }

    #[test]
    fn duplicate_email_is_case_insensitive() {
        let conn = test_db();
        register(&conn, None, registration("pat", Role::Patient)).unwrap();
        let mut reg = registration("other", Role::Patient);
        reg.email = "PAT@example.com".into();
        let errors = field_errors(register(&conn, None, reg).unwrap_err());
        assert!(errors.get("email").is_some());
    }

    #[test]
    fn short_phone_and_password_rejected() {
        let conn = test_db();
        let mut reg = registration("pat", Role::Patient);
        reg.phone = "12345".into();
        reg.password = "short".into();
        reg.password2 = "short".into();
        let errors = field_errors(register(&conn, None, reg).unwrap_err());
        assert!(errors.get("phone").is_some());
        assert!(errors.get("password").is_some());
    }

    #[test]
    fn admin_accounts_need_admin_requester() {
        let conn = test_db();
        let errors = field_errors(register(&conn, None, registration("root", Role::Admin)).unwrap_err());
        assert!(errors.get("role").is_some());

        let admin = Identity {
            user_id: Uuid::new_v4(),
            username: "boss".into(),
            role: Role::Admin,
            email: "boss@example.com".into(),
        };
        assert!(register(&conn, Some(&admin), registration("root", Role::Admin)).is_ok());
    }

    #[test]
    fn patient_lists_only_self_admin_lists_all() {
        let conn = test_db();
        let pat = register(&conn, None, registration("pat", Role::Patient)).unwrap();
        register(&conn, None, registration("doc", Role::Doctor)).unwrap();
        register(&conn, None, registration("carer", Role::Caregiver)).unwrap();

        let own = list_users(&conn, &Identity::from(&pat)).unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].id, pat.id);

        let admin = Identity {
            user_id: Uuid::new_v4(),
            username: "boss".into(),
            role: Role::Admin,
            email: "boss@example.com".into(),
        };
        assert_eq!(list_users(&conn, &admin).unwrap().len(), 3);
    }

    #[test]
    fn other_users_are_not_found() {
        let conn = test_db();
        let pat = register(&conn, None, registration("pat", Role::Patient)).unwrap();
        let doc = register(&conn, None, registration("doc", Role::Doctor)).unwrap();
        assert!(matches!(
            visible_user(&conn, &Identity::from(&pat), &doc.id),
            Err(DomainError::NotFound("User"))
        ));
    }

    #[test]
    fn update_applies_partial_changes() {
        let conn = test_db();
        let pat = register(&conn, None, registration("pat", Role::Patient)).unwrap();
        let changes: UserChanges =
            serde_json::from_str(r#"{"first_name": "Pat", "phone": "555-123-4567", "date_of_birth": "1980-02-03"}"#)
                .unwrap();
        let updated = update_user(&conn, pat, changes).unwrap();
        assert_eq!(updated.first_name, "Pat");
        assert_eq!(updated.phone, "5551234567");
        let view = UserView::from(updated);
        assert_eq!(view.full_name, "Pat");
        // email, first name, phone, date of birth of six fields
        assert_eq!(view.profile_completion, 66);
    }

    #[test]
    fn change_password_requires_old_password() {
        let conn = test_db();
        let pat = register(&conn, None, registration("pat", Role::Patient)).unwrap();
        let identity = Identity::from(&pat);

        let wrong = PasswordChange {
            old_password: "nope".into(),
            new_password: "brand-new-password".into(),
        };
        let errors = field_errors(change_password(&conn, &identity, wrong).unwrap_err());
        assert!(errors.get("old_password").is_some());

        let right = PasswordChange {
            old_password: "long-enough-pw".into(),
            new_password: "brand-new-password".into(),
        };
        change_password(&conn, &identity, right).unwrap();
        assert!(crate::auth::authenticate(&conn, "pat", "brand-new-password").is_ok());
    }
}
