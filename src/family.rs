//! Family contacts kept by an account holder.

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::{repository, DatabaseError};
use crate::models::enums::Relationship;
use crate::models::FamilyMember;
use crate::scoping;
use crate::validation::{normalize_email, normalize_phone, nullable, or_not_found, DomainError, FieldErrors};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;

const PROFILE_TAKEN: &str = "This health profile is already linked to another family member.";

/// Create and update body. Creation needs `name` and `relationship`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FamilyMemberChanges {
    pub name: Option<String>,
    pub relationship: Option<Relationship>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub date_of_birth: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub health_profile_id: Option<Option<Uuid>>,
    pub can_view: Option<bool>,
    pub can_edit: Option<bool>,
    pub is_emergency_contact: Option<bool>,
    pub emergency_contact_priority: Option<u8>,
}

impl FamilyMemberChanges {
    fn apply(self, conn: &Connection, identity: &Identity, member: &mut FamilyMember) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();

        if let Some(name) = self.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                errors.add("name", "This field is required.");
            }
            member.name = name;
        }
        if let Some(email) = self.email {
            member.email = if email.trim().is_empty() {
                String::new()
            } else {
                normalize_email(&email, "email", &mut errors)
            };
        }
        if let Some(phone) = self.phone {
            member.phone = normalize_phone(&phone, "phone", &mut errors);
        }
        if let Some(priority) = self.emergency_contact_priority {
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
                errors.add(
                    "emergency_contact_priority",
                    format!("Ensure this value is between {MIN_PRIORITY} and {MAX_PRIORITY}."),
                );
            }
            member.emergency_contact_priority = priority;
        }
        if let Some(link) = self.health_profile_id {
            if let Some(id) = link {
                let in_scope = repository::get_health_profile(conn, &id)?
                    .is_some_and(|hp| scoping::health_profiles(identity).contains(&hp.user_id));
                if !in_scope {
                    errors.add("health_profile_id", "Health profile does not exist.");
                } else if repository::member_linked_to(conn, &id)?.is_some_and(|m| m != member.id) {
                    errors.add("health_profile_id", PROFILE_TAKEN);
                }
            }
            member.health_profile_id = link;
        }
        errors.into_result()?;

        if let Some(v) = self.relationship {
            member.relationship = v;
        }
        if let Some(v) = self.date_of_birth {
            member.date_of_birth = v;
        }
        if let Some(v) = self.can_view {
            member.can_view = v;
        }
        if let Some(v) = self.can_edit {
            member.can_edit = v;
        }
        if let Some(v) = self.is_emergency_contact {
            member.is_emergency_contact = v;
        }
        member.updated_at = Utc::now();
        Ok(())
    }
}

/// The requester's contacts: emergency contacts first, by priority, then by name.
pub fn list_family_members(conn: &Connection, identity: &Identity) -> Result<Vec<FamilyMember>, DomainError> {
    Ok(repository::list_family_members(conn, &identity.user_id)?)
}

pub fn visible_family_member(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<FamilyMember, DomainError> {
    repository::get_family_member(conn, id)?
        .filter(|m| scoping::family_members(identity).contains(&m.main_user_id))
        .ok_or(DomainError::NotFound("Family member"))
}

pub fn create_family_member(
    conn: &Connection,
    identity: &Identity,
    changes: FamilyMemberChanges,
) -> Result<FamilyMember, DomainError> {
    let mut errors = FieldErrors::new();
    if changes.name.is_none() {
        errors.add("name", "This field is required.");
    }
    if changes.relationship.is_none() {
        errors.add("relationship", "This field is required.");
    }
    errors.into_result()?;

    let now = Utc::now();
    let mut member = FamilyMember {
        id: Uuid::new_v4(),
        main_user_id: identity.user_id,
        name: String::new(),
        relationship: Relationship::Other,
        email: String::new(),
        phone: String::new(),
        date_of_birth: None,
        health_profile_id: None,
        can_view: false,
        can_edit: false,
        is_emergency_contact: false,
        emergency_contact_priority: MIN_PRIORITY,
        created_at: now,
        updated_at: now,
    };
    changes.apply(conn, identity, &mut member)?;
    repository::insert_family_member(conn, &member).map_err(link_conflict)?;
    tracing::info!(member_id = %member.id, main_user_id = %member.main_user_id, "family member added");
    Ok(member)
}

pub fn update_family_member(
    conn: &Connection,
    identity: &Identity,
    mut member: FamilyMember,
    changes: FamilyMemberChanges,
) -> Result<FamilyMember, DomainError> {
    changes.apply(conn, identity, &mut member)?;
    repository::update_family_member(conn, &member).map_err(link_conflict)?;
    Ok(member)
}

/// A concurrent link to the same health profile loses on the UNIQUE column.
fn link_conflict(e: DatabaseError) -> DomainError {
    if e.is_unique_violation() {
        DomainError::field("health_profile_id", PROFILE_TAKEN)
    } else {
        e.into()
    }
}

pub fn delete_family_member(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_family_member(conn, id).map_err(or_not_found("Family member"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::models::enums::Role;

    fn changes(json: &str) -> FamilyMemberChanges {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn create_requires_name_and_relationship() {
        let conn = test_db();
        let owner = Identity::from(&make_user(&conn, "pat", Role::Patient));
        match create_family_member(&conn, &owner, changes("{}")).unwrap_err() {
            DomainError::Validation(errors) => {
                assert!(errors.get("name").is_some());
                assert!(errors.get("relationship").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn priority_must_be_one_to_five() {
        let conn = test_db();
        let owner = Identity::from(&make_user(&conn, "pat", Role::Patient));
        let err = create_family_member(
            &conn,
            &owner,
            changes(r#"{"name": "Ann", "relationship": "spouse", "emergency_contact_priority": 6}"#),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn members_listed_emergency_first() {
        let conn = test_db();
        let owner = Identity::from(&make_user(&conn, "pat", Role::Patient));
        create_family_member(&conn, &owner, changes(r#"{"name": "Bob", "relationship": "child"}"#)).unwrap();
        create_family_member(
            &conn,
            &owner,
            changes(r#"{"name": "Zoe", "relationship": "spouse", "is_emergency_contact": true, "emergency_contact_priority": 2}"#),
        )
        .unwrap();
        let names: Vec<String> = list_family_members(&conn, &owner).unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Zoe", "Bob"]);
    }

    #[test]
    fn other_owners_members_are_not_found() {
        let conn = test_db();
        let owner = Identity::from(&make_user(&conn, "pat", Role::Patient));
        let stranger = Identity::from(&make_user(&conn, "other", Role::Patient));
        let member =
            create_family_member(&conn, &owner, changes(r#"{"name": "Ann", "relationship": "parent"}"#)).unwrap();
        assert!(visible_family_member(&conn, &owner, &member.id).is_ok());
        assert!(matches!(
            visible_family_member(&conn, &stranger, &member.id),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn update_normalizes_contact_details() {
        let conn = test_db();
        let owner = Identity::from(&make_user(&conn, "pat", Role::Patient));
        let member =
            create_family_member(&conn, &owner, changes(r#"{"name": "Ann", "relationship": "parent"}"#)).unwrap();
        let updated = update_family_member(
            &conn,
            &owner,
            member,
            changes(r#"{"email": " Ann@Example.com ", "phone": "(555) 222-3333", "can_view": true}"#),
        )
        .unwrap();
        assert_eq!(updated.email, "ann@example.com");
        assert_eq!(updated.phone, "5552223333");
        assert!(updated.can_view);
    }

    #[test]
    fn health_profile_link_must_be_own_and_free() {
        let conn = test_db();
        let a = make_user(&conn, "pat_a", Role::Patient);
        let b = make_user(&conn, "pat_b", Role::Patient);
        crate::lifecycle::ensure_role_profiles(&conn, &a).unwrap();
        let profile = repository::get_health_profile_by_user(&conn, &a.id).unwrap().unwrap();
        let (a, b) = (Identity::from(&a), Identity::from(&b));
        let link = format!(r#"{{"name": "Me", "relationship": "other", "health_profile_id": "{}"}}"#, profile.id);

        let mine = create_family_member(&conn, &a, changes(&link)).unwrap();
        assert_eq!(mine.health_profile_id, Some(profile.id));

        match create_family_member(&conn, &b, changes(&link)).unwrap_err() {
            DomainError::Validation(errors) => assert!(errors.get("health_profile_id").is_some()),
            other => panic!("unexpected {other:?}"),
        }
        match create_family_member(&conn, &a, changes(&link)).unwrap_err() {
            DomainError::Validation(errors) => assert_eq!(
                errors.get("health_profile_id").unwrap()[0],
                PROFILE_TAKEN
            ),
            other => panic!("unexpected {other:?}"),
        }

        // Re-saving the member that holds the link is not a conflict.
        let relinked = format!(r#"{{"health_profile_id": "{}"}}"#, profile.id);
        assert!(update_family_member(&conn, &a, mine, changes(&relinked)).is_ok());
    }

    #[test]
    fn unique_link_violation_is_a_field_error() {
        let conn = test_db();
        let owner = make_user(&conn, "pat", Role::Patient);
        crate::lifecycle::ensure_role_profiles(&conn, &owner).unwrap();
        let profile = repository::get_health_profile_by_user(&conn, &owner.id).unwrap().unwrap();
        let mut first = repository::sample_member(owner.id, "One");
        first.health_profile_id = Some(profile.id);
        repository::insert_family_member(&conn, &first).unwrap();

        let mut second = repository::sample_member(owner.id, "Two");
        second.health_profile_id = Some(profile.id);
        let err = repository::insert_family_member(&conn, &second).map_err(link_conflict).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
