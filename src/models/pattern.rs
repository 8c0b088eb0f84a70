use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RetirementReason;

/// Width of a lag bucket. Patterns whose lags fall in the same bucket merge.
pub const LAG_BUCKET_HOURS: i64 = 24;

pub fn lag_bucket(lag_hours: i64) -> i64 {
    lag_hours.div_euclid(LAG_BUCKET_HOURS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn of(strength: f64) -> Self {
        if strength < 0.0 {
            Self::Negative
        } else {
            Self::Positive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

/// A confirmed correlation between two factors for one child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyPattern {
    pub id: Uuid,
    pub child_id: Uuid,
    pub input_factor: String,
    pub output_factor: String,
    pub strength: f64,
    pub confidence: f64,
    pub sample_size: u32,
    pub lag_hours: i64,
    /// Correlation request whose data most recently supported this pattern.
    pub source_request_id: Option<Uuid>,
    pub first_detected_at: NaiveDateTime,
    pub last_confirmed_at: NaiveDateTime,
    pub times_confirmed: u32,
    pub active: bool,
    pub deactivated_at: Option<NaiveDateTime>,
    pub deactivation_reason: Option<RetirementReason>,
}

impl FamilyPattern {
    pub fn lag_bucket(&self) -> i64 {
        lag_bucket(self.lag_hours)
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.strength)
    }
}
