use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{InsightCategory, InsightTier, PatternLinkKind};
use super::observation::DateRange;
use super::pattern::Direction;

/// Who an insight is attributed to. Tier-specific data lives on the variant,
/// so cohort counts only exist on cohort insights and only individual insights
/// can name a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum InsightScope {
    Individual {
        child_id: Uuid,
    },
    Cohort {
        cohort_id: Uuid,
        families_affected: u32,
        families_total: u32,
    },
    Global,
}

impl InsightScope {
    pub fn tier(&self) -> InsightTier {
        match self {
            Self::Individual { .. } => InsightTier::Individual,
            Self::Cohort { .. } => InsightTier::Cohort,
            Self::Global => InsightTier::Global,
        }
    }

    pub fn child_id(&self) -> Option<Uuid> {
        match self {
            Self::Individual { child_id } => Some(*child_id),
            _ => None,
        }
    }

    pub fn cohort_id(&self) -> Option<Uuid> {
        match self {
            Self::Cohort { cohort_id, .. } => Some(*cohort_id),
            _ => None,
        }
    }
}

/// The pattern an insight was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PatternLink {
    Family(Uuid),
    Cohort(Uuid),
}

impl PatternLink {
    pub fn kind(&self) -> PatternLinkKind {
        match self {
            Self::Family(_) => PatternLinkKind::Family,
            Self::Cohort(_) => PatternLinkKind::Cohort,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Family(id) | Self::Cohort(id) => *id,
        }
    }

    pub fn from_parts(kind: PatternLinkKind, id: Uuid) -> Self {
        match kind {
            PatternLinkKind::Family => Self::Family(id),
            PatternLinkKind::Cohort => Self::Cohort(id),
        }
    }

    /// Whether this link may back an insight of the given scope.
    /// Family patterns only back individual insights; cohort patterns never do.
    pub fn fits(&self, scope: &InsightScope) -> bool {
        matches!(
            (self, scope),
            (Self::Family(_), InsightScope::Individual { .. })
                | (Self::Cohort(_), InsightScope::Cohort { .. })
                | (Self::Cohort(_), InsightScope::Global)
        )
    }
}

/// Structured body of an insight, one shape per kind of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightDetail {
    FactorCorrelation {
        input_factor: String,
        output_factor: String,
        lag_hours: i64,
        direction: Direction,
        times_confirmed: u32,
    },
    CohortAggregate {
        input_factor: String,
        output_factor: String,
        average_correlation: f64,
        std_dev: f64,
        ci_low: f64,
        ci_high: f64,
    },
    Curated {
        source: String,
        references: Vec<String>,
    },
}

/// Caregiver-facing insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub scope: InsightScope,
    pub category: InsightCategory,
    pub summary_simple: String,
    pub summary_detailed: String,
    pub detail: InsightDetail,
    pub confidence: f64,
    pub sample_size: u32,
    pub strength: Option<f64>,
    pub significance: Option<f64>,
    pub date_range: Option<DateRange>,
    pub pattern_link: Option<PatternLink>,
    pub clinically_validated: bool,
    pub validation_count: u32,
    pub active: bool,
    pub surfaced_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Insight {
    pub fn tier(&self) -> InsightTier {
        self.scope.tier()
    }
}

/// Insight content proposed by the engine or a curator, before upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCandidate {
    pub scope: InsightScope,
    pub category: InsightCategory,
    pub summary_simple: String,
    pub summary_detailed: String,
    pub detail: InsightDetail,
    pub confidence: f64,
    pub sample_size: u32,
    pub strength: Option<f64>,
    pub significance: Option<f64>,
    pub date_range: Option<DateRange>,
    pub pattern_link: Option<PatternLink>,
}
