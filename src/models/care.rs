use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ChangeType, InterrogativeStatus, PromptSource, ValidationType};

/// Provider (or caregiver) confirmation of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalValidation {
    pub id: Uuid,
    pub child_id: Uuid,
    pub pattern_id: Option<Uuid>,
    pub insight_id: Option<Uuid>,
    pub validation_type: ValidationType,
    pub validated_by: String,
    pub treatment_changed: bool,
    pub description: Option<String>,
    pub caregiver_confirmed: bool,
    pub caregiver_confirmed_at: Option<NaiveDateTime>,
    /// 0.0–1.0, how strongly the validator stands behind the pattern.
    pub validation_strength: f64,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewClinicalValidation {
    pub child_id: Uuid,
    pub pattern_id: Option<Uuid>,
    pub insight_id: Option<Uuid>,
    pub validation_type: ValidationType,
    pub validated_by: String,
    pub treatment_changed: bool,
    pub description: Option<String>,
    pub validation_strength: f64,
    pub expires_at: Option<NaiveDateTime>,
}

/// A care or treatment change, carrying its interrogative prompt state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentChange {
    pub id: Uuid,
    pub child_id: Uuid,
    pub caregiver_id: Uuid,
    pub change_type: ChangeType,
    pub description: String,
    pub changed_at: NaiveDateTime,
    pub related_insight_id: Option<Uuid>,
    pub hours_since_insight: Option<i64>,
    pub interrogative_status: InterrogativeStatus,
    pub prompted_at: Option<NaiveDateTime>,
    pub answered_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTreatmentChange {
    pub child_id: Uuid,
    pub caregiver_id: Uuid,
    pub change_type: ChangeType,
    pub description: String,
    pub changed_at: NaiveDateTime,
    pub related_insight_id: Option<Uuid>,
}

/// Caregiver's answer to an interrogative prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentChangeResponse {
    pub id: Uuid,
    pub treatment_change_id: Uuid,
    pub related_to_analysis: bool,
    pub prompted_by: PromptSource,
    pub notes: Option<String>,
    pub responded_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInput {
    pub related_to_analysis: bool,
    pub prompted_by: PromptSource,
    pub notes: Option<String>,
}

/// When a caregiver is willing to be asked about treatment changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionPreferences {
    pub caregiver_id: Uuid,
    pub interrogatives_enabled: bool,
    /// Hour of day (0–23) quiet hours begin. Equal start and end disables quiet hours.
    pub quiet_start_hour: u32,
    pub quiet_end_hour: u32,
    /// Days prompts may be sent on. Empty means every day.
    pub preferred_days: Vec<Weekday>,
    pub max_interrogatives_per_day: u32,
    pub delay_hours_after_change: u32,
}

impl InteractionPreferences {
    pub fn defaults_for(caregiver_id: Uuid) -> Self {
        Self {
            caregiver_id,
            interrogatives_enabled: true,
            quiet_start_hour: 21,
            quiet_end_hour: 8,
            preferred_days: Vec::new(),
            max_interrogatives_per_day: 2,
            delay_hours_after_change: 48,
        }
    }

    /// Quiet hours may wrap past midnight (21 → 8).
    pub fn in_quiet_hours(&self, at: NaiveDateTime) -> bool {
        let hour = at.hour();
        let (start, end) = (self.quiet_start_hour, self.quiet_end_hour);
        if start == end {
            false
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    pub fn is_preferred_day(&self, at: NaiveDateTime) -> bool {
        self.preferred_days.is_empty() || self.preferred_days.contains(&at.weekday())
    }
}

/// Validation and interrogative counters for one child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_validations: u32,
    pub clinical_validations: u32,
    pub average_validation_strength: Option<f64>,
    pub clinically_validated_insights: u32,
    pub treatment_changes: u32,
    pub pending_interrogatives: u32,
    pub prompted_interrogatives: u32,
    pub answered_interrogatives: u32,
    pub related_to_analysis: u32,
}
