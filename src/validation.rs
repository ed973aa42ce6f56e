//! Field-level validation errors and the shared domain error type.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::AuthError;
use crate::db::DatabaseError;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Messages keyed by the offending field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), DomainError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(self))
        }
    }
}

/// Errors raised by the domain services.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Authentication credentials were not provided")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    /// A fault whose detail was already logged; only the message is shown.
    #[error("{0}")]
    Internal(&'static str),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<rusqlite::Error> for DomainError {
    fn from(err: rusqlite::Error) -> Self {
        DomainError::Database(DatabaseError::from(err))
    }
}

impl DomainError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        DomainError::Validation(FieldErrors::single(field, message))
    }
}

/// Maps a repository `NotFound` onto the domain 404 for `entity`.
pub fn or_not_found(entity: &'static str) -> impl FnOnce(DatabaseError) -> DomainError {
    move |err| match err {
        DatabaseError::NotFound { .. } => DomainError::NotFound(entity),
        other => other.into(),
    }
}

/// Lets PATCH bodies tell "absent" (`None`) from an explicit `null`
/// (`Some(None)`). Use with `#[serde(default, deserialize_with = "nullable")]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Strips everything but digits; at least ten must remain.
pub fn normalize_phone(raw: &str, field: &str, errors: &mut FieldErrors) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if !raw.trim().is_empty() && digits.len() < 10 {
        errors.add(field, "Phone number must be at least 10 digits.");
    }
    digits
}

/// Lowercased, trimmed email with a shape check.
pub fn normalize_email(raw: &str, field: &str, errors: &mut FieldErrors) -> String {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        errors.add(field, "This field is required.");
    } else if !EMAIL_PATTERN.is_match(&email) {
        errors.add(field, "Enter a valid email address.");
    }
    email
}

/// Requires `value` to be non-blank.
pub fn require(value: &str, field: &str, errors: &mut FieldErrors) {
    if value.trim().is_empty() {
        errors.add(field, "This field is required.");
    }
}
