//! Shared types for the HTTP layer.

use std::sync::Arc;

use rusqlite::Connection;

use crate::api::error::ApiError;
use crate::auth::{Identity, TokenIssuer};
use crate::authorization::Policy;
use crate::config::AppConfig;
use crate::db::open_connection;

/// Cookie carrying the access token for the server-rendered pages.
pub const SESSION_COOKIE: &str = "caresync_session";

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub config: Arc<AppConfig>,
    pub tokens: TokenIssuer,
}

impl ApiContext {
    pub fn new(config: AppConfig) -> Self {
        let tokens = TokenIssuer::from_config(&config);
        Self {
            config: Arc::new(config),
            tokens,
        }
    }

    /// A fresh connection for one request. The schema was migrated at startup.
    pub fn open_db(&self) -> Result<Connection, ApiError> {
        Ok(open_connection(&self.config.db_path)?)
    }
}

// ═══════════════════════════════════════════════════════════
// Requester: injected by auth middleware
// ═══════════════════════════════════════════════════════════

/// Whoever sent the request. `None` when no credentials were presented;
/// presented-but-invalid credentials never get this far.
#[derive(Debug, Clone, Default)]
pub struct Requester(pub Option<Identity>);

impl Requester {
    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }

    /// The identity, once `policy` lets it through.
    pub fn require(&self, policy: Policy) -> Result<&Identity, ApiError> {
        policy.check(self.identity()).into_result()?;
        self.identity().ok_or(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::Role;
    use uuid::Uuid;

    fn patient() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "pat".into(),
            role: Role::Patient,
            email: "pat@example.com".into(),
        }
    }

    #[test]
    fn anonymous_requester_is_unauthorized() {
        let err = Requester::default().require(Policy::Authenticated).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn wrong_role_is_forbidden() {
        let requester = Requester(Some(patient()));
        assert!(requester.require(Policy::PatientOnly).is_ok());
        assert!(matches!(requester.require(Policy::DoctorOnly), Err(ApiError::Forbidden(_))));
    }
}
