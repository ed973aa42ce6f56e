//! Patient, doctor and health profiles.
//!
//! Each profile hangs one-to-one off a user. Views embed a short summary of
//! the owning account; health views also carry BMI and completion figures.

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::repository;
use crate::db::DatabaseError;
use crate::metrics::{bmi, bmi_category, health_profile_completion};
use crate::models::enums::{BloodType, BmiCategory, Gender, Role};
use crate::models::{DoctorProfile, HealthProfile, PatientProfile, User};
use crate::scoping;
use crate::validation::{normalize_phone, nullable, or_not_found, DomainError, FieldErrors};

pub const MAX_HEIGHT_CM: f64 = 300.0;
pub const MAX_WEIGHT_KG: f64 = 700.0;

// ═══════════════════════════════════════════
// Views
// ═══════════════════════════════════════════

/// The owning account, as embedded in profile responses.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileOwner {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub full_name: String,
}

impl From<&User> for ProfileOwner {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            full_name: user.full_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientProfileView {
    #[serde(flatten)]
    pub profile: PatientProfile,
    pub user: Option<ProfileOwner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorProfileView {
    #[serde(flatten)]
    pub profile: DoctorProfile,
    pub user: Option<ProfileOwner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthProfileView {
    #[serde(flatten)]
    pub profile: HealthProfile,
    pub user: Option<ProfileOwner>,
    pub bmi: Option<f64>,
    pub bmi_category: Option<BmiCategory>,
    pub completion_percentage: u8,
}

fn owner(conn: &Connection, user_id: &Uuid) -> Result<Option<ProfileOwner>, DatabaseError> {
    Ok(repository::get_user(conn, user_id)?.as_ref().map(ProfileOwner::from))
}

pub fn patient_view(conn: &Connection, profile: PatientProfile) -> Result<PatientProfileView, DomainError> {
    Ok(PatientProfileView {
        user: owner(conn, &profile.user_id)?,
        profile,
    })
}

pub fn doctor_view(conn: &Connection, profile: DoctorProfile) -> Result<DoctorProfileView, DomainError> {
    Ok(DoctorProfileView {
        user: owner(conn, &profile.user_id)?,
        profile,
    })
}

pub fn health_view(conn: &Connection, profile: HealthProfile) -> Result<HealthProfileView, DomainError> {
    let value = bmi(profile.height, profile.weight);
    Ok(HealthProfileView {
        user: owner(conn, &profile.user_id)?,
        bmi: value,
        bmi_category: bmi_category(value),
        completion_percentage: health_profile_completion(&profile),
        profile,
    })
}

fn already_exists(kind: &'static str) -> impl FnOnce(DatabaseError) -> DomainError {
    move |err| {
        if err.is_unique_violation() {
            DomainError::field("user", format!("This user already has a {kind} profile."))
        } else {
            err.into()
        }
    }
}

// ═══════════════════════════════════════════
// Patient profiles
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientProfileChanges {
    #[serde(default, deserialize_with = "nullable")]
    pub blood_type: Option<Option<BloodType>>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub emergency_contact_relationship: Option<String>,
}

impl PatientProfileChanges {
    fn apply(self, profile: &mut PatientProfile) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();
        if let Some(phone) = self.emergency_contact_phone {
            profile.emergency_contact_phone = normalize_phone(&phone, "emergency_contact_phone", &mut errors);
        }
        errors.into_result()?;

        if let Some(v) = self.blood_type {
            profile.blood_type = v;
        }
        if let Some(v) = self.allergies {
            profile.allergies = v;
        }
        if let Some(v) = self.chronic_conditions {
            profile.chronic_conditions = v;
        }
        if let Some(v) = self.emergency_contact_name {
            profile.emergency_contact_name = v;
        }
        if let Some(v) = self.emergency_contact_relationship {
            profile.emergency_contact_relationship = v;
        }
        profile.updated_at = Utc::now();
        Ok(())
    }
}

pub fn list_patient_profiles(conn: &Connection, identity: &Identity) -> Result<Vec<PatientProfileView>, DomainError> {
    repository::list_patient_profiles(conn, &scoping::patient_profiles(identity))?
        .into_iter()
        .map(|p| patient_view(conn, p))
        .collect()
}

pub fn visible_patient_profile(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<PatientProfile, DomainError> {
    repository::get_patient_profile(conn, id)?
        .filter(|p| scoping::patient_profiles(identity).contains(&p.user_id))
        .ok_or(DomainError::NotFound("Patient profile"))
}

/// Creates the requester's own patient profile.
pub fn create_patient_profile(
    conn: &Connection,
    identity: &Identity,
    changes: PatientProfileChanges,
) -> Result<PatientProfile, DomainError> {
    let mut profile = PatientProfile::new(identity.user_id);
    changes.apply(&mut profile)?;
    repository::insert_patient_profile(conn, &profile).map_err(already_exists("patient"))?;
    Ok(profile)
}

pub fn update_patient_profile(
    conn: &Connection,
    mut profile: PatientProfile,
    changes: PatientProfileChanges,
) -> Result<PatientProfile, DomainError> {
    changes.apply(&mut profile)?;
    repository::update_patient_profile(conn, &profile)?;
    Ok(profile)
}

pub fn delete_patient_profile(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_patient_profile(conn, id).map_err(or_not_found("Patient profile"))
}

// ═══════════════════════════════════════════
// Doctor profiles
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoctorProfileChanges {
    pub specialization: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub license_number: Option<Option<String>>,
    pub hospital_affiliation: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub years_of_experience: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub consultation_fee: Option<Option<f64>>,
    pub is_available: Option<bool>,
    pub available_days: Option<String>,
    pub available_hours: Option<String>,
}

impl DoctorProfileChanges {
    fn apply(self, conn: &Connection, profile: &mut DoctorProfile) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();

        if let Some(license) = self.license_number {
            let license = license.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
            if let Some(l) = &license {
                if repository::license_taken(conn, l, Some(&profile.id))? {
                    errors.add("license_number", "A doctor with this license number already exists.");
                }
            }
            profile.license_number = license;
        }
        if let Some(fee) = self.consultation_fee {
            if fee.is_some_and(|f| !f.is_finite() || f < 0.0) {
                errors.add("consultation_fee", "Ensure this value is greater than or equal to 0.");
            }
            profile.consultation_fee = fee;
        }
        errors.into_result()?;

        if let Some(v) = self.specialization {
            profile.specialization = v;
        }
        if let Some(v) = self.hospital_affiliation {
            profile.hospital_affiliation = v;
        }
        if let Some(v) = self.years_of_experience {
            profile.years_of_experience = v;
        }
        if let Some(v) = self.is_available {
            profile.is_available = v;
        }
        if let Some(v) = self.available_days {
            profile.available_days = v;
        }
        if let Some(v) = self.available_hours {
            profile.available_hours = v;
        }
        profile.updated_at = Utc::now();
        Ok(())
    }
}

pub fn list_doctor_profiles(conn: &Connection, identity: &Identity) -> Result<Vec<DoctorProfileView>, DomainError> {
    repository::list_doctor_profiles(conn, &scoping::doctor_profiles(identity))?
        .into_iter()
        .map(|p| doctor_view(conn, p))
        .collect()
}

pub fn visible_doctor_profile(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<DoctorProfile, DomainError> {
    repository::get_doctor_profile(conn, id)?
        .filter(|p| scoping::doctor_profiles(identity).contains(&p.user_id))
        .ok_or(DomainError::NotFound("Doctor profile"))
}

pub fn create_doctor_profile(
    conn: &Connection,
    identity: &Identity,
    changes: DoctorProfileChanges,
) -> Result<DoctorProfile, DomainError> {
    let mut profile = DoctorProfile::new(identity.user_id);
    changes.apply(conn, &mut profile)?;
    repository::insert_doctor_profile(conn, &profile).map_err(already_exists("doctor"))?;
    Ok(profile)
}

pub fn update_doctor_profile(
    conn: &Connection,
    mut profile: DoctorProfile,
    changes: DoctorProfileChanges,
) -> Result<DoctorProfile, DomainError> {
    changes.apply(conn, &mut profile)?;
    repository::update_doctor_profile(conn, &profile).map_err(|e| {
        if e.is_unique_violation() {
            DomainError::field("license_number", "A doctor with this license number already exists.")
        } else {
            e.into()
        }
    })?;
    Ok(profile)
}

pub fn delete_doctor_profile(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_doctor_profile(conn, id).map_err(or_not_found("Doctor profile"))
}

// ═══════════════════════════════════════════
// Health profiles
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthProfileChanges {
    #[serde(default, deserialize_with = "nullable")]
    pub gender: Option<Option<Gender>>,
    #[serde(default, deserialize_with = "nullable")]
    pub height: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub weight: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub blood_type: Option<Option<BloodType>>,
    pub allergies: Option<String>,
    pub current_medications: Option<String>,
    pub medical_conditions: Option<String>,
    pub surgical_history: Option<String>,
    pub family_history: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub smoking_status: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub alcohol_consumption: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub exercise_frequency: Option<Option<String>>,
    pub primary_doctor_name: Option<String>,
    pub primary_doctor_phone: Option<String>,
    pub primary_doctor_clinic: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub emergency_contact_relation: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_id: Option<String>,
    pub insurance_group: Option<String>,
    pub additional_notes: Option<String>,
    pub is_complete: Option<bool>,
}

fn check_range(value: Option<f64>, max: f64, field: &str, errors: &mut FieldErrors) {
    if let Some(v) = value {
        if !v.is_finite() || v <= 0.0 || v > max {
            errors.add(field, format!("Ensure this value is greater than 0 and at most {max}."));
        }
    }
}

impl HealthProfileChanges {
    fn apply(self, hp: &mut HealthProfile) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();
        if let Some(height) = self.height {
            check_range(height, MAX_HEIGHT_CM, "height", &mut errors);
            hp.height = height;
        }
        if let Some(weight) = self.weight {
            check_range(weight, MAX_WEIGHT_KG, "weight", &mut errors);
            hp.weight = weight;
        }
        if let Some(phone) = self.primary_doctor_phone {
            hp.primary_doctor_phone = normalize_phone(&phone, "primary_doctor_phone", &mut errors);
        }
        if let Some(phone) = self.emergency_contact_phone {
            hp.emergency_contact_phone = normalize_phone(&phone, "emergency_contact_phone", &mut errors);
        }
        errors.into_result()?;

        macro_rules! assign {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(v) = self.$field {
                    hp.$field = v;
                })+
            };
        }
        assign!(
            gender,
            blood_type,
            allergies,
            current_medications,
            medical_conditions,
            surgical_history,
            family_history,
            smoking_status,
            alcohol_consumption,
            exercise_frequency,
            primary_doctor_name,
            primary_doctor_clinic,
            emergency_contact_name,
            emergency_contact_relation,
            insurance_provider,
            insurance_id,
            insurance_group,
            additional_notes,
            is_complete,
        );
        hp.updated_at = Utc::now();
        Ok(())
    }
}

pub fn list_health_profiles(conn: &Connection, identity: &Identity) -> Result<Vec<HealthProfileView>, DomainError> {
    repository::list_health_profiles(conn, &scoping::health_profiles(identity))?
        .into_iter()
        .map(|p| health_view(conn, p))
        .collect()
}

pub fn visible_health_profile(conn: &Connection, identity: &Identity, id: &Uuid) -> Result<HealthProfile, DomainError> {
    repository::get_health_profile(conn, id)?
        .filter(|p| scoping::health_profiles(identity).contains(&p.user_id))
        .ok_or(DomainError::NotFound("Health profile"))
}

/// The requester's own health profile with derived figures.
pub fn health_summary(conn: &Connection, identity: &Identity) -> Result<HealthProfileView, DomainError> {
    let profile = repository::get_health_profile_by_user(conn, &identity.user_id)?
        .ok_or(DomainError::NotFound("Health profile"))?;
    health_view(conn, profile)
}

pub fn create_health_profile(
    conn: &Connection,
    identity: &Identity,
    changes: HealthProfileChanges,
) -> Result<HealthProfile, DomainError> {
    let mut profile = HealthProfile::new(identity.user_id);
    changes.apply(&mut profile)?;
    repository::insert_health_profile(conn, &profile).map_err(already_exists("health"))?;
    Ok(profile)
}

pub fn update_health_profile(
    conn: &Connection,
    mut profile: HealthProfile,
    changes: HealthProfileChanges,
) -> Result<HealthProfile, DomainError> {
    changes.apply(&mut profile)?;
    repository::update_health_profile(conn, &profile)?;
    Ok(profile)
}

pub fn delete_health_profile(conn: &Connection, id: &Uuid) -> Result<(), DomainError> {
    repository::delete_health_profile(conn, id).map_err(or_not_found("Health profile"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::{make_user, test_db};
    use crate::lifecycle::ensure_role_profiles;

    fn patient(conn: &Connection, name: &str) -> (User, Identity) {
        let user = make_user(conn, name, Role::Patient);
        ensure_role_profiles(conn, &user).unwrap();
        let identity = Identity::from(&user);
        (user, identity)
    }

    #[test]
    fn health_view_carries_bmi_and_completion() {
        let conn = test_db();
        let (_, identity) = patient(&conn, "pat");
        let profile = repository::get_health_profile_by_user(&conn, &identity.user_id).unwrap().unwrap();
        let changes: HealthProfileChanges =
            serde_json::from_str(r#"{"height": 180, "weight": 81, "gender": "male", "allergies": "pollen"}"#).unwrap();
        let updated = update_health_profile(&conn, profile, changes).unwrap();

        let view = health_summary(&conn, &identity).unwrap();
        assert_eq!(view.profile.id, updated.id);
        assert_eq!(view.bmi, Some(25.0));
        assert_eq!(view.bmi_category, Some(BmiCategory::Overweight));
        assert_eq!(view.completion_percentage, 57);
        assert_eq!(view.user.unwrap().username, "pat");
    }

    #[test]
    fn out_of_range_vitals_rejected() {
        let conn = test_db();
        let (_, identity) = patient(&conn, "pat");
        let profile = repository::get_health_profile_by_user(&conn, &identity.user_id).unwrap().unwrap();
        let changes: HealthProfileChanges = serde_json::from_str(r#"{"height": 0, "weight": 701}"#).unwrap();
        match update_health_profile(&conn, profile, changes).unwrap_err() {
            DomainError::Validation(errors) => {
                assert!(errors.get("height").is_some());
                assert!(errors.get("weight").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_clears_height() {
        let conn = test_db();
        let (_, identity) = patient(&conn, "pat");
        let profile = repository::get_health_profile_by_user(&conn, &identity.user_id).unwrap().unwrap();
        let set: HealthProfileChanges = serde_json::from_str(r#"{"height": 170}"#).unwrap();
        let profile = update_health_profile(&conn, profile, set).unwrap();
        let clear: HealthProfileChanges = serde_json::from_str(r#"{"height": null}"#).unwrap();
        let profile = update_health_profile(&conn, profile, clear).unwrap();
        assert_eq!(profile.height, None);
    }

    #[test]
    fn summary_without_profile_is_not_found() {
        let conn = test_db();
        let carer = make_user(&conn, "carer", Role::Caregiver);
        assert!(matches!(
            health_summary(&conn, &Identity::from(&carer)),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn caregiver_cannot_see_patient_profiles() {
        let conn = test_db();
        let (_, identity) = patient(&conn, "pat");
        let profile = repository::get_patient_profile_by_user(&conn, &identity.user_id).unwrap().unwrap();
        let carer = Identity::from(&make_user(&conn, "carer", Role::Caregiver));
        assert!(list_patient_profiles(&conn, &carer).unwrap().is_empty());
        assert!(visible_patient_profile(&conn, &carer, &profile.id).is_err());
        assert!(visible_patient_profile(&conn, &identity, &profile.id).is_ok());
    }

    #[test]
    fn second_patient_profile_is_rejected() {
        let conn = test_db();
        let (_, identity) = patient(&conn, "pat");
        let err = create_patient_profile(&conn, &identity, PatientProfileChanges::default()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn license_numbers_are_unique() {
        let conn = test_db();
        let first = make_user(&conn, "doc1", Role::Doctor);
        let second = make_user(&conn, "doc2", Role::Doctor);
        ensure_role_profiles(&conn, &first).unwrap();
        ensure_role_profiles(&conn, &second).unwrap();

        let p1 = repository::get_doctor_profile_by_user(&conn, &first.id).unwrap().unwrap();
        let p2 = repository::get_doctor_profile_by_user(&conn, &second.id).unwrap().unwrap();
        let license = DoctorProfileChanges {
            license_number: Some(Some("MD-1".into())),
            ..Default::default()
        };
        update_doctor_profile(&conn, p1.clone(), license.clone()).unwrap();
        // re-saving the same profile keeps its own license
        update_doctor_profile(&conn, p1, license.clone()).unwrap();
        match update_doctor_profile(&conn, p2, license).unwrap_err() {
            DomainError::Validation(errors) => assert!(errors.get("license_number").is_some()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_fee_rejected() {
        let conn = test_db();
        let doc = make_user(&conn, "doc", Role::Doctor);
        ensure_role_profiles(&conn, &doc).unwrap();
        let profile = repository::get_doctor_profile_by_user(&conn, &doc.id).unwrap().unwrap();
        let changes = DoctorProfileChanges {
            consultation_fee: Some(Some(-5.0)),
            ..Default::default()
        };
        assert!(update_doctor_profile(&conn, profile, changes).is_err());
    }

    #[test]
    fn doctor_sees_only_own_doctor_profile() {
        let conn = test_db();
        let a = make_user(&conn, "doc1", Role::Doctor);
        let b = make_user(&conn, "doc2", Role::Doctor);
        ensure_role_profiles(&conn, &a).unwrap();
        ensure_role_profiles(&conn, &b).unwrap();
        let (_, patient_identity) = patient(&conn, "pat");

        assert_eq!(list_doctor_profiles(&conn, &Identity::from(&a)).unwrap().len(), 1);
        assert_eq!(list_doctor_profiles(&conn, &patient_identity).unwrap().len(), 2);
    }
}
