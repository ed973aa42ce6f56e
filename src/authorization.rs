//! Endpoint access predicates.
//!
//! Default-deny. A missing identity is always `Unauthenticated` (401); a
//! present identity that fails a role or ownership rule is `Forbidden`
//! (403). Record visibility is handled separately by `scoping`.

use axum::http::Method;
use uuid::Uuid;

use crate::auth::Identity;
use crate::models::enums::Role;
use crate::validation::DomainError;

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Unauthenticated,
    Forbidden,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        self == AccessDecision::Allow
    }

    pub fn into_result(self) -> Result<(), DomainError> {
        match self {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Unauthenticated => Err(DomainError::Unauthenticated),
            AccessDecision::Forbidden => Err(DomainError::Forbidden(
                "You do not have permission to perform this action.".into(),
            )),
        }
    }
}

/// Role predicates attached to endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Authenticated,
    PatientOnly,
    DoctorOnly,
    AdminOnly,
    PatientOrDoctor,
    PatientOrAdmin,
    /// Passes when any member passes.
    AnyOf(&'static [Policy]),
}

/// Profile endpoints: patients and doctors, with admins let through.
pub const PROFILE_ACCESS: Policy = Policy::AnyOf(&[Policy::PatientOrDoctor, Policy::AdminOnly]);

impl Policy {
    pub fn check(&self, identity: Option<&Identity>) -> AccessDecision {
        let Some(identity) = identity else {
            return AccessDecision::Unauthenticated;
        };
        if self.allows_role(identity.role) {
            AccessDecision::Allow
        } else {
            AccessDecision::Forbidden
        }
    }

    fn allows_role(&self, role: Role) -> bool {
        match self {
            Policy::Authenticated => true,
            Policy::PatientOnly => role == Role::Patient,
            Policy::DoctorOnly => role == Role::Doctor,
            Policy::AdminOnly => role == Role::Admin,
            Policy::PatientOrDoctor => matches!(role, Role::Patient | Role::Doctor),
            Policy::PatientOrAdmin => matches!(role, Role::Patient | Role::Admin),
            Policy::AnyOf(policies) => policies.iter().any(|p| p.allows_role(role)),
        }
    }
}

/// GET, HEAD and OPTIONS never modify state.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Reads are open to any authenticated caller; writes only to the owner.
pub fn owner_or_read_only(identity: Option<&Identity>, method: &Method, owner: &Uuid) -> AccessDecision {
    let Some(identity) = identity else {
        return AccessDecision::Unauthenticated;
    };
    if is_safe_method(method) || identity.user_id == *owner {
        AccessDecision::Allow
    } else {
        AccessDecision::Forbidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn who(role: Role) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "u".into(),
            role,
            email: "u@example.com".into(),
        }
    }

    #[test]
    fn anonymous_is_always_unauthenticated() {
        for policy in [
            Policy::Authenticated,
            Policy::PatientOnly,
            Policy::AdminOnly,
            PROFILE_ACCESS,
        ] {
            assert_eq!(policy.check(None), AccessDecision::Unauthenticated);
        }
        assert_eq!(
            owner_or_read_only(None, &Method::GET, &Uuid::new_v4()),
            AccessDecision::Unauthenticated
        );
    }

    #[test]
    fn exact_role_predicates() {
        assert!(Policy::PatientOnly.check(Some(&who(Role::Patient))).is_allowed());
        assert_eq!(Policy::PatientOnly.check(Some(&who(Role::Doctor))), AccessDecision::Forbidden);
        assert!(Policy::DoctorOnly.check(Some(&who(Role::Doctor))).is_allowed());
        assert_eq!(Policy::AdminOnly.check(Some(&who(Role::Caregiver))), AccessDecision::Forbidden);
        assert!(Policy::Authenticated.check(Some(&who(Role::Caregiver))).is_allowed());
    }

    #[test]
    fn role_set_predicates() {
        assert!(Policy::PatientOrDoctor.check(Some(&who(Role::Doctor))).is_allowed());
        assert!(!Policy::PatientOrDoctor.check(Some(&who(Role::Admin))).is_allowed());
        assert!(Policy::PatientOrAdmin.check(Some(&who(Role::Admin))).is_allowed());
        assert!(!Policy::PatientOrAdmin.check(Some(&who(Role::Doctor))).is_allowed());
    }

    #[test]
    fn profile_access_lets_admins_through() {
        assert!(PROFILE_ACCESS.check(Some(&who(Role::Admin))).is_allowed());
        assert!(PROFILE_ACCESS.check(Some(&who(Role::Patient))).is_allowed());
        assert_eq!(PROFILE_ACCESS.check(Some(&who(Role::Caregiver))), AccessDecision::Forbidden);
    }

    #[test]
    fn decisions_map_to_domain_errors() {
        assert!(AccessDecision::Allow.into_result().is_ok());
        assert!(matches!(
            AccessDecision::Unauthenticated.into_result(),
            Err(DomainError::Unauthenticated)
        ));
        assert!(matches!(
            AccessDecision::Forbidden.into_result(),
            Err(DomainError::Forbidden(_))
        ));
    }

    #[test]
    fn owner_or_read_only_by_method() {
        let owner = who(Role::Patient);
        let other = who(Role::Doctor);
        assert!(owner_or_read_only(Some(&other), &Method::GET, &owner.user_id).is_allowed());
        assert!(owner_or_read_only(Some(&other), &Method::HEAD, &owner.user_id).is_allowed());
        assert_eq!(
            owner_or_read_only(Some(&other), &Method::PUT, &owner.user_id),
            AccessDecision::Forbidden
        );
        assert_eq!(
            owner_or_read_only(Some(&other), &Method::DELETE, &owner.user_id),
            AccessDecision::Forbidden
        );
        assert!(owner_or_read_only(Some(&owner), &Method::PATCH, &owner.user_id).is_allowed());
    }
}
