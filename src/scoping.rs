//! Role-scoped record selection.
//!
//! Every list and object lookup is narrowed to what the requester may see
//! before it reaches SQL. Roles with no business seeing a record type get
//! an empty set, never an error.

use rusqlite::Connection;
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::repository::{patients_of_doctor, users_delegating_edits_to, users_sharing_with};
use crate::db::DatabaseError;
use crate::models::enums::Role;

/// A set of owning user ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Only(Vec<Uuid>),
    Nothing,
}

impl Scope {
    /// SQL predicate over `column` with positional `?` parameters.
    pub fn sql_filter(&self, column: &str) -> (String, Vec<String>) {
        match self {
            Scope::All => ("1 = 1".into(), Vec::new()),
            Scope::Only(ids) if !ids.is_empty() => {
                let marks = vec!["?"; ids.len()].join(", ");
                (
                    format!("{column} IN ({marks})"),
                    ids.iter().map(Uuid::to_string).collect(),
                )
            }
            Scope::Only(_) | Scope::Nothing => ("1 = 0".into(), Vec::new()),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(ids) => ids.contains(id),
            Scope::Nothing => false,
        }
    }

    fn own(identity: &Identity) -> Self {
        Scope::Only(vec![identity.user_id])
    }
}

/// Scope for records hanging off a patient medication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedicationScope {
    pub patients: Scope,
    /// Hide deactivated rows.
    pub active_only: bool,
}

impl MedicationScope {
    /// Visible when the owner is in scope and, if required, the row is active.
    pub fn admits(&self, patient_id: &Uuid, is_active: bool) -> bool {
        self.patients.contains(patient_id) && (is_active || !self.active_only)
    }
}

/// Prescriptions are scoped on both parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionScope {
    pub patients: Scope,
    pub doctors: Scope,
}

impl PrescriptionScope {
    pub fn admits(&self, patient_id: &Uuid, doctor_id: &Uuid) -> bool {
        self.patients.contains(patient_id) && self.doctors.contains(doctor_id)
    }
}

pub fn users(identity: &Identity) -> Scope {
    match identity.role {
        Role::Admin => Scope::All,
        _ => Scope::own(identity),
    }
}

pub fn patient_profiles(identity: &Identity) -> Scope {
    match identity.role {
        Role::Admin | Role::Doctor => Scope::All,
        Role::Patient => Scope::own(identity),
        Role::Caregiver => Scope::Nothing,
    }
}

pub fn health_profiles(identity: &Identity) -> Scope {
    patient_profiles(identity)
}

pub fn doctor_profiles(identity: &Identity) -> Scope {
    match identity.role {
        Role::Doctor => Scope::own(identity),
        Role::Admin | Role::Patient | Role::Caregiver => Scope::All,
    }
}

/// Family contacts are always the requester's own.
pub fn family_members(identity: &Identity) -> Scope {
    Scope::own(identity)
}

/// Patients whose family contacts list the caregiver's email with view rights.
fn cared_for(conn: &Connection, identity: &Identity) -> Result<Scope, DatabaseError> {
    Ok(Scope::Only(users_sharing_with(conn, &identity.email)?))
}

pub fn patient_medications(conn: &Connection, identity: &Identity) -> Result<MedicationScope, DatabaseError> {
    let scope = match identity.role {
        Role::Admin => MedicationScope { patients: Scope::All, active_only: false },
        Role::Patient => MedicationScope { patients: Scope::own(identity), active_only: true },
        Role::Doctor => MedicationScope {
            patients: Scope::Only(patients_of_doctor(conn, &identity.user_id)?),
            active_only: false,
        },
        Role::Caregiver => MedicationScope {
            patients: cared_for(conn, identity)?,
            active_only: false,
        },
    };
    Ok(scope)
}

pub fn reminders(conn: &Connection, identity: &Identity) -> Result<MedicationScope, DatabaseError> {
    let scope = match identity.role {
        Role::Admin => MedicationScope { patients: Scope::All, active_only: false },
        Role::Patient => MedicationScope { patients: Scope::own(identity), active_only: true },
        Role::Doctor => MedicationScope { patients: Scope::Nothing, active_only: true },
        Role::Caregiver => MedicationScope {
            patients: cared_for(conn, identity)?,
            active_only: true,
        },
    };
    Ok(scope)
}

pub fn medication_logs(conn: &Connection, identity: &Identity) -> Result<Scope, DatabaseError> {
    match identity.role {
        Role::Admin => Ok(Scope::All),
        Role::Patient => Ok(Scope::own(identity)),
        Role::Doctor => Ok(Scope::Nothing),
        Role::Caregiver => cared_for(conn, identity),
    }
}

/// Patients whose medications, reminders and logs the requester may change.
///
/// Narrower than the read scopes: doctors only read, and caregivers need
/// the contact row to carry `can_edit` as well.
pub fn medication_writers(conn: &Connection, identity: &Identity) -> Result<Scope, DatabaseError> {
    match identity.role {
        Role::Admin => Ok(Scope::All),
        Role::Patient => Ok(Scope::own(identity)),
        Role::Doctor => Ok(Scope::Nothing),
        Role::Caregiver => Ok(Scope::Only(users_delegating_edits_to(conn, &identity.email)?)),
    }
}

pub fn prescriptions(identity: &Identity) -> PrescriptionScope {
    match identity.role {
        Role::Admin => PrescriptionScope { patients: Scope::All, doctors: Scope::All },
        Role::Patient => PrescriptionScope { patients: Scope::own(identity), doctors: Scope::All },
        Role::Doctor => PrescriptionScope { patients: Scope::All, doctors: Scope::own(identity) },
        Role::Caregiver => PrescriptionScope { patients: Scope::Nothing, doctors: Scope::Nothing },
    }
}
