//! Error taxonomy for the pattern engine.
//!
//! `kind()` is the stable machine name stored on failed requests and skipped
//! pairs. `user_message()` is the only text that reaches a caregiver.

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data for {metric}: {found} samples, need {required}")]
    InsufficientData {
        metric: String,
        found: usize,
        required: u32,
    },

    #[error("Insufficient paired data for {input} -> {output}: {found} pairs, need {required}")]
    InsufficientPairedData {
        input: String,
        output: String,
        found: usize,
        required: u32,
    },

    #[error("Series for {metric} has zero variance")]
    DegenerateSeries { metric: String },

    #[error("No usable baseline for {metric}: {reason}")]
    BaselineUnavailable { metric: String, reason: String },

    #[error("Request {0} was claimed by another worker")]
    JobClaimConflict(String),

    #[error("Request {0} was reclaimed before the worker finished")]
    JobTimeout(String),

    #[error("Cohort {cohort_id} has {members} members, below its floor of {floor}")]
    CohortPrivacyFloor {
        cohort_id: String,
        members: u32,
        floor: u32,
    },

    #[error("Pattern {pattern_id} contradicted by a new result (r = {new_strength:.3})")]
    ContradictoryPattern {
        pattern_id: String,
        new_strength: f64,
    },

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Cannot move {entity} {id} from {from} to {to}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    #[error("Request {id} already finished as {status}")]
    AlreadyFinished { id: String, status: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AnalysisError {
    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "insufficient_data",
            Self::InsufficientPairedData { .. } => "insufficient_paired_data",
            Self::DegenerateSeries { .. } => "degenerate_series",
            Self::BaselineUnavailable { .. } => "baseline_unavailable",
            Self::JobClaimConflict(_) => "job_claim_conflict",
            Self::JobTimeout(_) => "job_timeout",
            Self::CohortPrivacyFloor { .. } => "cohort_privacy_floor",
            Self::ContradictoryPattern { .. } => "contradictory_pattern",
            Self::Store(_) => "store",
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::AlreadyFinished { .. } => "already_finished",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    /// Caregiver-safe text. Never includes store messages or identifiers.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => {
                "There isn't enough logged data yet. Keep tracking and check back in a few days."
            }
            Self::InsufficientPairedData { .. } => {
                "These two things haven't been logged on enough of the same days to compare them."
            }
            Self::DegenerateSeries { .. } => {
                "One of these values hasn't changed over this period, so there is nothing to compare."
            }
            Self::BaselineUnavailable { .. } => {
                "We couldn't work out a typical range for this yet."
            }
            Self::JobClaimConflict(_) | Self::JobTimeout(_) => {
                "This analysis is already being processed. Please check back shortly."
            }
            Self::CohortPrivacyFloor { .. } => {
                "Not enough families are in this group yet to share results privately."
            }
            Self::ContradictoryPattern { .. } => {
                "Recent data no longer supports an earlier pattern, so it has been retired."
            }
            Self::Store(_) => "Something went wrong saving your data. Please try again.",
            Self::NotFound { .. } => "We couldn't find that item.",
            Self::InvalidTransition { .. } => "This item can't be updated right now.",
            Self::AlreadyFinished { .. } => "This analysis has already finished.",
            Self::InvalidInput(_) => "Some of the details provided aren't valid.",
        }
    }

    /// Whether the error only affects one factor pair (the request can still
    /// complete with the other pairs).
    pub fn is_pair_local(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. }
                | Self::InsufficientPairedData { .. }
                | Self::DegenerateSeries { .. }
                | Self::BaselineUnavailable { .. }
        )
    }

    /// Map a store `NotFound` onto the engine's own `NotFound`.
    pub fn from_store(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => Self::NotFound {
                entity: entity_type,
                id,
            },
            other => Self::Store(other),
        }
    }
}
