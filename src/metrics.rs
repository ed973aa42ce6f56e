//! Derived health and medication figures.
//!
//! Pure functions over loaded records; nothing here touches the database.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::enums::{BmiCategory, InteractionSeverity, LogStatus};
use crate::models::{DrugInteraction, HealthProfile, MedicationLog, PatientMedication, User};

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Body-mass index from height in cm and weight in kg, one decimal place.
pub fn bmi(height_cm: Option<f64>, weight_kg: Option<f64>) -> Option<f64> {
    let (height, weight) = (height_cm?, weight_kg?);
    if height <= 0.0 {
        return None;
    }
    let metres = height / 100.0;
    Some(round_to(weight / (metres * metres), 1))
}

pub fn bmi_category(bmi: Option<f64>) -> Option<BmiCategory> {
    let bmi = bmi?;
    Some(if bmi < 18.5 {
        BmiCategory::Underweight
    } else if bmi < 25.0 {
        BmiCategory::Normal
    } else if bmi < 30.0 {
        BmiCategory::Overweight
    } else {
        BmiCategory::Obese
    })
}

/// Whole-number percentage of filled fields, rounded down.
pub fn completion_percentage(filled: &[bool]) -> u8 {
    if filled.is_empty() {
        return 0;
    }
    let done = filled.iter().filter(|f| **f).count();
    (done * 100 / filled.len()) as u8
}

pub fn health_profile_completion(hp: &HealthProfile) -> u8 {
    completion_percentage(&[
        hp.gender.is_some(),
        hp.height.is_some(),
        hp.weight.is_some(),
        hp.blood_type.is_some(),
        !hp.allergies.trim().is_empty(),
        !hp.current_medications.trim().is_empty(),
        !hp.medical_conditions.trim().is_empty(),
    ])
}

pub fn user_profile_completion(user: &User) -> u8 {
    completion_percentage(&[
        !user.email.trim().is_empty(),
        !user.first_name.trim().is_empty(),
        !user.last_name.trim().is_empty(),
        !user.phone.trim().is_empty(),
        user.date_of_birth.is_some(),
        !user.address.trim().is_empty(),
    ])
}

/// Taken-or-late share of `logs` as a percentage with two decimals.
/// Zero when there are no logs.
pub fn adherence_rate(logs: &[MedicationLog]) -> f64 {
    let taken = logs.iter().filter(|l| l.status.counts_as_taken()).count();
    rate(taken, logs.len())
}

fn rate(taken: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(taken as f64 / total as f64 * 100.0, 2)
}

#[derive(Debug, Clone, Serialize)]
pub struct MedicationAdherence {
    pub medication_id: Uuid,
    pub medication_name: String,
    pub total_doses: usize,
    pub taken_doses: usize,
    pub missed_doses: usize,
    pub adherence_rate: f64,
    pub last_taken: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdherenceSummary {
    pub total_doses: usize,
    pub taken_doses: usize,
    pub missed_doses: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdherenceReport {
    pub overall_adherence: f64,
    pub weekly_adherence: f64,
    pub medications: Vec<MedicationAdherence>,
    pub total_medications: usize,
    pub active_medications: usize,
    pub summary: AdherenceSummary,
}

pub fn medication_adherence(med: &PatientMedication, logs: &[MedicationLog]) -> MedicationAdherence {
    let taken: Vec<&MedicationLog> = logs.iter().filter(|l| l.status.counts_as_taken()).collect();
    MedicationAdherence {
        medication_id: med.id,
        medication_name: med.name.clone(),
        total_doses: logs.len(),
        taken_doses: taken.len(),
        missed_doses: logs.iter().filter(|l| l.status == LogStatus::Missed).count(),
        adherence_rate: rate(taken.len(), logs.len()),
        last_taken: taken.iter().map(|l| l.scheduled_time).max(),
    }
}

/// Roll per-medication figures up into a patient report. `weekly_logs`
/// are the patient's logs from the trailing seven days.
pub fn adherence_report(per_medication: Vec<MedicationAdherence>, weekly_logs: &[MedicationLog]) -> AdherenceReport {
    let total: usize = per_medication.iter().map(|m| m.total_doses).sum();
    let taken: usize = per_medication.iter().map(|m| m.taken_doses).sum();
    AdherenceReport {
        overall_adherence: rate(taken, total),
        weekly_adherence: adherence_rate(weekly_logs),
        total_medications: per_medication.len(),
        active_medications: per_medication.len(),
        medications: per_medication,
        summary: AdherenceSummary {
            total_doses: total,
            taken_doses: taken,
            missed_doses: total - taken,
        },
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// True when `interaction` is recorded for the pair, in either order.
pub fn interaction_matches(interaction: &DrugInteraction, a: &str, b: &str) -> bool {
    let (x, y) = (normalize(&interaction.medication_1), normalize(&interaction.medication_2));
    let (a, b) = (normalize(a), normalize(b));
    (x == a && y == b) || (x == b && y == a)
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionHit {
    pub medication_1: String,
    pub medication_2: String,
    pub severity: InteractionSeverity,
    pub description: String,
    pub recommendation: String,
}

/// Checks each unordered pair of `names` once against the interaction table.
pub fn pairwise_interactions(names: &[String], table: &[DrugInteraction]) -> Vec<InteractionHit> {
    let mut hits = Vec::new();
    for (i, first) in names.iter().enumerate() {
        for second in &names[i + 1..] {
            if let Some(found) = table.iter().find(|t| interaction_matches(t, first, second)) {
                hits.push(InteractionHit {
                    medication_1: first.clone(),
                    medication_2: second.clone(),
                    severity: found.severity,
                    description: found.description.clone(),
                    recommendation: found.recommendation.clone(),
                });
            }
        }
    }
    hits
}

/// Earliest instant strictly after `now` on one of `days` (0 = Monday)
/// at `time`. None when `days` holds no valid weekday.
pub fn next_trigger_after(now: DateTime<Utc>, time: NaiveTime, days: &[u8]) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    (0..=7).find_map(|offset| {
        let date = today + Duration::days(offset);
        let weekday = date.weekday().num_days_from_monday() as u8;
        let candidate = date.and_time(time).and_utc();
        (days.contains(&weekday) && candidate > now).then_some(candidate)
    })
}

/// A medication is expired once its end date has passed.
pub fn is_expired(end_date: Option<NaiveDate>, today: NaiveDate) -> bool {
    end_date.is_some_and(|end| end < today)
}
