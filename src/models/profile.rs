use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BloodType, Gender};

/// Medical summary kept for every patient account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub blood_type: Option<BloodType>,
    pub allergies: String,
    pub chronic_conditions: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relationship: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Professional details kept for every doctor account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub specialization: String,
    pub license_number: Option<String>,
    pub hospital_affiliation: String,
    pub years_of_experience: Option<u32>,
    pub consultation_fee: Option<f64>,
    pub is_available: bool,
    pub available_days: String,
    pub available_hours: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Vitals, history and care contacts. Height in cm, weight in kg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub gender: Option<Gender>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub blood_type: Option<BloodType>,
    pub allergies: String,
    pub current_medications: String,
    pub medical_conditions: String,
    pub surgical_history: String,
    pub family_history: String,
    pub smoking_status: Option<String>,
    pub alcohol_consumption: Option<String>,
    pub exercise_frequency: Option<String>,
    pub primary_doctor_name: String,
    pub primary_doctor_phone: String,
    pub primary_doctor_clinic: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relation: String,
    pub insurance_provider: String,
    pub insurance_id: String,
    pub insurance_group: String,
    pub additional_notes: String,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientProfile {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            blood_type: None,
            allergies: String::new(),
            chronic_conditions: String::new(),
            emergency_contact_name: String::new(),
            emergency_contact_phone: String::new(),
            emergency_contact_relationship: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl DoctorProfile {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            specialization: String::new(),
            license_number: None,
            hospital_affiliation: String::new(),
            years_of_experience: None,
            consultation_fee: None,
            is_available: true,
            available_days: String::new(),
            available_hours: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl HealthProfile {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            gender: None,
            height: None,
            weight: None,
            blood_type: None,
            allergies: String::new(),
            current_medications: String::new(),
            medical_conditions: String::new(),
            surgical_history: String::new(),
            family_history: String::new(),
            smoking_status: None,
            alcohol_consumption: None,
            exercise_frequency: None,
            primary_doctor_name: String::new(),
            primary_doctor_phone: String::new(),
            primary_doctor_clinic: String::new(),
            emergency_contact_name: String::new(),
            emergency_contact_phone: String::new(),
            emergency_contact_relation: String::new(),
            insurance_provider: String::new(),
            insurance_id: String::new(),
            insurance_group: String::new(),
            additional_notes: String::new(),
            is_complete: false,
            created_at: now,
            updated_at: now,
        }
    }
}
