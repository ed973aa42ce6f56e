use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{PrescriptionSource, PrescriptionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: PrescriptionStatus,
    pub diagnosis: String,
    pub instructions: String,
    pub notes: String,
    pub safety_scan_performed: bool,
    pub safety_warnings: Vec<String>,
    pub scan_timestamp: Option<DateTime<Utc>>,
    pub source: PrescriptionSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
