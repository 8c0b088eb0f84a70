use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RequestStatus;
use super::observation::DateRange;

/// A correlation job: one child, one or more factor pairs, one date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRequest {
    pub id: Uuid,
    pub child_id: Uuid,
    pub requested_by: String,
    pub input_factors: Vec<String>,
    pub output_factors: Vec<String>,
    pub date_range: DateRange,
    pub lag_hours: i64,
    pub status: RequestStatus,
    pub result: Option<CorrelationOutcome>,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub queued_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub claimed_by: Option<String>,
    pub reclaim_count: u32,
    /// Family patterns created or confirmed by this run.
    pub pattern_ids: Vec<Uuid>,
}

impl CorrelationRequest {
    /// Every (input, output) combination requested, skipping self-pairs.
    pub fn factor_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for input in &self.input_factors {
            for output in &self.output_factors {
                if input != output {
                    pairs.push((input.clone(), output.clone()));
                }
            }
        }
        pairs
    }
}

/// Parameters for queueing a new request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCorrelationRequest {
    pub child_id: Uuid,
    pub requested_by: String,
    pub input_factors: Vec<String>,
    pub output_factors: Vec<String>,
    pub date_range: DateRange,
    /// Falls back to the configured default lag when absent.
    pub lag_hours: Option<i64>,
}

/// Result payload stored on a completed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationOutcome {
    pub pairs: Vec<PairOutcome>,
}

impl CorrelationOutcome {
    pub fn computed(&self) -> impl Iterator<Item = &FactorCorrelation> {
        self.pairs.iter().filter_map(|p| match p {
            PairOutcome::Computed(c) => Some(c),
            PairOutcome::Skipped { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    Computed(FactorCorrelation),
    Skipped {
        input_factor: String,
        output_factor: String,
        /// Error kind that prevented the computation (`degenerate_series`, ...).
        reason: String,
    },
}

/// Correlation between one input and one output factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorCorrelation {
    pub input_factor: String,
    pub output_factor: String,
    pub lag_hours: i64,
    /// Pearson r, in [-1, 1].
    pub strength: f64,
    /// Two-sided p-value of r under the Student t test.
    pub p_value: f64,
    /// `1 - p_value`.
    pub significance: f64,
    /// Significance shrunk towards zero for small samples.
    pub confidence: f64,
    pub paired_samples: u32,
    pub input_baseline_id: Option<Uuid>,
    pub output_baseline_id: Option<Uuid>,
}
