use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile attributes used for cohort matching and the anonymous member hash.
///
/// `child_key` keeps two children with identical clinical signatures from
/// collapsing into a single member. It only ever enters the keyed hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildProfile {
    pub child_key: Uuid,
    pub diagnoses: Vec<String>,
    pub medication_classes: Vec<String>,
    pub age_years: u32,
}

/// Coarse age band used in the hashed signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBand {
    Infant,
    Preschool,
    EarlySchool,
    Preteen,
    Teen,
    Adult,
}

impl AgeBand {
    pub fn of(age_years: u32) -> Self {
        match age_years {
            0..=2 => Self::Infant,
            3..=5 => Self::Preschool,
            6..=9 => Self::EarlySchool,
            10..=12 => Self::Preteen,
            13..=17 => Self::Teen,
            _ => Self::Adult,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infant => "0-2",
            Self::Preschool => "3-5",
            Self::EarlySchool => "6-9",
            Self::Preteen => "10-12",
            Self::Teen => "13-17",
            Self::Adult => "18+",
        }
    }
}

/// Matching criteria. Empty sets and absent bounds match everyone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortCriteria {
    pub diagnoses: Vec<String>,
    pub medication_classes: Vec<String>,
    pub min_age_years: Option<u32>,
    pub max_age_years: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
    pub id: Uuid,
    pub name: String,
    pub criteria: CohortCriteria,
    /// k-anonymity floor for any statistic about this cohort.
    pub min_members: u32,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortMembership {
    pub cohort_id: Uuid,
    pub member_hash: String,
    pub match_score: f64,
    pub joined_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A cohort the profile qualifies for, with how closely it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortMatch {
    pub cohort: CohortDefinition,
    pub match_score: f64,
}

/// One member's active family pattern, stripped to what aggregation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternContribution {
    pub member_hash: String,
    pub input_factor: String,
    pub output_factor: String,
    pub strength: f64,
}

/// Aggregate of one factor pair across a cohort's families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortPattern {
    pub id: Uuid,
    pub cohort_id: Uuid,
    pub input_factor: String,
    pub output_factor: String,
    pub families_affected: u32,
    pub families_total: u32,
    pub average_correlation: f64,
    pub std_dev: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub description_simple: String,
    pub description_detailed: String,
    pub active: bool,
    pub computed_at: NaiveDateTime,
}
