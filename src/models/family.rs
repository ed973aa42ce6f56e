use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::Relationship;

/// A relative or carer listed by an account holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyMember {
    pub id: Uuid,
    pub main_user_id: Uuid,
    pub name: String,
    pub relationship: Relationship,
    pub email: String,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub health_profile_id: Option<Uuid>,
    pub can_view: bool,
    pub can_edit: bool,
    pub is_emergency_contact: bool,
    /// 1 (first to call) through 5.
    pub emergency_contact_priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
