use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Frequency, InteractionSeverity, LogStatus, NotificationType};

/// Catalog entry (master medication list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub name: String,
    pub generic_name: Option<String>,
    pub brand_name: Option<String>,
    pub dosage_form: String,
    pub strength: String,
    pub drug_class: Option<String>,
    pub atc_code: Option<String>,
    pub pregnancy_category: Option<String>,
    pub controlled_substance: bool,
    pub requires_prescription: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A medication a specific patient is (or was) taking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientMedication {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub name: String,
    pub dosage: String,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub instructions: String,
    pub prescribing_doctor: String,
    pub pharmacy: String,
    pub is_active: bool,
    pub reason_for_discontinuation: String,
    pub total_quantity: Option<u32>,
    pub remaining_quantity: Option<u32>,
    pub refills_remaining: u32,
    pub safety_checked: bool,
    pub safety_warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recurring reminder. Days are 0 (Monday) through 6 (Sunday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationReminder {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub reminder_time: NaiveTime,
    pub days_of_week: Vec<u8>,
    pub notification_type: NotificationType,
    pub is_active: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub next_trigger: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One intake event (or a missed one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationLog {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub reminder_id: Option<Uuid>,
    pub scheduled_time: DateTime<Utc>,
    pub actual_time: Option<DateTime<Utc>>,
    pub status: LogStatus,
    pub dosage_taken: String,
    pub notes: String,
    pub confirmed_by: Option<Uuid>,
    pub confirmation_method: String,
    pub created_at: DateTime<Utc>,
}

/// A known interaction between two medication names. Order-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugInteraction {
    pub id: Uuid,
    pub medication_1: String,
    pub medication_2: String,
    pub severity: InteractionSeverity,
    pub description: String,
    pub mechanism: String,
    pub recommendation: String,
    pub created_at: DateTime<Utc>,
}
