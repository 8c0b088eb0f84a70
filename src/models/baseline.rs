use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Statistical normal range of one metric for one child.
///
/// Rows are never updated in place: a recomputation inserts a new row and
/// stamps `superseded_at` on the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub id: Uuid,
    pub child_id: Uuid,
    pub metric: String,
    pub mean: f64,
    pub std_dev: f64,
    pub sample_size: u32,
    pub computed_at: NaiveDateTime,
    pub valid_until: NaiveDateTime,
    pub superseded_at: Option<NaiveDateTime>,
}

impl Baseline {
    /// Usable for analysis at `now`: current and not past its validity window.
    pub fn is_valid_at(&self, now: NaiveDateTime) -> bool {
        self.superseded_at.is_none() && now < self.valid_until
    }

    /// Standard score of `value` against this baseline. `None` for a flat baseline.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.std_dev > 0.0 && self.std_dev.is_finite() {
            Some((value - self.mean) / self.std_dev)
        } else {
            None
        }
    }
}
