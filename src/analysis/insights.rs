//! Insight tier manager.
//!
//! Individual insights come from family patterns, cohort insights from cohort
//! patterns at or above the privacy floor, and global insights are curated or
//! promoted from cohort patterns. Linked insights are upserted so a pattern
//! never backs more than one active insight.

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repository;
use crate::models::enums::{InsightCategory, InsightTier};
use crate::models::{
    CohortDefinition, CohortPattern, DateRange, Direction, FamilyPattern, Insight,
    InsightCandidate, InsightDetail, InsightScope, PatternLink,
};

use super::AnalysisError;

// ═══════════════════════════════════════════════════════════
// Wording
// ═══════════════════════════════════════════════════════════

fn humanize(factor: &str) -> String {
    factor.replace(['_', '-'], " ").trim().to_string()
}

fn lag_phrase(lag_hours: i64) -> String {
    match lag_hours {
        0 => "the same day".to_string(),
        24 => "the next day".to_string(),
        h if h % 24 == 0 => format!("{} days later", h / 24),
        h => format!("about {h} hours later"),
    }
}

fn direction_word(direction: Direction) -> &'static str {
    match direction {
        Direction::Positive => "higher",
        Direction::Negative => "lower",
    }
}

fn strength_word(r: f64) -> &'static str {
    match r.abs() {
        a if a >= 0.7 => "strong",
        a if a >= 0.4 => "moderate",
        _ => "weak",
    }
}

/// Candidate for the individual insight a family pattern backs.
pub fn individual_candidate(
    pattern: &FamilyPattern,
    significance: f64,
    date_range: Option<DateRange>,
) -> InsightCandidate {
    let input = humanize(&pattern.input_factor);
    let output = humanize(&pattern.output_factor);
    let direction = pattern.direction();

    let summary_simple = format!(
        "Higher {input} tends to come with {} {output} {}.",
        direction_word(direction),
        lag_phrase(pattern.lag_hours),
    );
    let summary_detailed = format!(
        "Across {} paired days, {input} and {output} showed a {} {} link \
         (r = {:.2}, confidence {:.0}%). Seen in {} analysis run(s).",
        pattern.sample_size,
        strength_word(pattern.strength),
        direction.as_str(),
        pattern.strength,
        pattern.confidence * 100.0,
        pattern.times_confirmed,
    );

    InsightCandidate {
        scope: InsightScope::Individual {
            child_id: pattern.child_id,
        },
        category: InsightCategory::from_factor(&pattern.input_factor),
        summary_simple,
        summary_detailed,
        detail: InsightDetail::FactorCorrelation {
            input_factor: pattern.input_factor.clone(),
            output_factor: pattern.output_factor.clone(),
            lag_hours: pattern.lag_hours,
            direction,
            times_confirmed: pattern.times_confirmed,
        },
        confidence: pattern.confidence,
        sample_size: pattern.sample_size,
        strength: Some(pattern.strength),
        significance: Some(significance),
        date_range,
        pattern_link: Some(PatternLink::Family(pattern.id)),
    }
}

/// Simple and detailed wording for a cohort aggregate.
pub fn describe_cohort_pattern(
    input_factor: &str,
    output_factor: &str,
    families_affected: u32,
    families_total: u32,
    average: f64,
    ci: (f64, f64),
) -> (String, String) {
    let input = humanize(input_factor);
    let output = humanize(output_factor);
    let simple = format!(
        "In {families_affected} of {families_total} similar families, higher {input} \
         tends to come with {} {output}.",
        direction_word(Direction::of(average)),
    );
    let detailed = format!(
        "Averaged across {families_affected} families, {input} and {output} showed a {} \
         link (mean r = {average:.2}, 95% CI {:.2} to {:.2}).",
        strength_word(average),
        ci.0,
        ci.1,
    );
    (simple, detailed)
}

fn cohort_candidate(
    scope: InsightScope,
    pattern: &CohortPattern,
) -> InsightCandidate {
    InsightCandidate {
        scope,
        category: InsightCategory::from_factor(&pattern.input_factor),
        summary_simple: pattern.description_simple.clone(),
        summary_detailed: pattern.description_detailed.clone(),
        detail: InsightDetail::CohortAggregate {
            input_factor: pattern.input_factor.clone(),
            output_factor: pattern.output_factor.clone(),
            average_correlation: pattern.average_correlation,
            std_dev: pattern.std_dev,
            ci_low: pattern.ci_low,
            ci_high: pattern.ci_high,
        },
        confidence: pattern.average_correlation.abs().min(1.0)
            * pattern.families_affected as f64
            / pattern.families_total.max(1) as f64,
        sample_size: pattern.families_affected,
        strength: Some(pattern.average_correlation),
        significance: None,
        date_range: None,
        pattern_link: Some(PatternLink::Cohort(pattern.id)),
    }
}

// ═══════════════════════════════════════════════════════════
// Upsert
// ═══════════════════════════════════════════════════════════

/// Insert a candidate, or update the active insight already linked to the
/// same pattern in place.
///
/// Creation time, validation count and the clinical flag survive an update.
/// A global insight is never demoted back to cohort scope. Must run inside
/// a transaction the caller owns when paired with other writes.
pub fn upsert_insight(
    conn: &Connection,
    candidate: InsightCandidate,
    now: NaiveDateTime,
) -> Result<Insight, AnalysisError> {
    if let Some(link) = &candidate.pattern_link {
        if !link.fits(&candidate.scope) {
            return Err(AnalysisError::InvalidInput(format!(
                "{} pattern link cannot back a {} insight",
                link.kind(),
                candidate.scope.tier()
            )));
        }
    }

    let existing = match &candidate.pattern_link {
        Some(link) => repository::find_active_insight_by_link(conn, link)?,
        None => None,
    };

    match existing {
        Some(current) => {
            let scope = if current.tier() == InsightTier::Global
                && candidate.scope.tier() == InsightTier::Cohort
            {
                InsightScope::Global
            } else {
                candidate.scope
            };
            let updated = Insight {
                id: current.id,
                scope,
                category: candidate.category,
                summary_simple: candidate.summary_simple,
                summary_detailed: candidate.summary_detailed,
                detail: candidate.detail,
                confidence: candidate.confidence,
                sample_size: candidate.sample_size,
                strength: candidate.strength,
                significance: candidate.significance,
                date_range: candidate.date_range,
                pattern_link: current.pattern_link,
                clinically_validated: current.clinically_validated,
                validation_count: current.validation_count,
                active: true,
                surfaced_at: current.surfaced_at,
                created_at: current.created_at,
                updated_at: now,
            };
            repository::update_insight_content(conn, &updated)?;
            tracing::debug!(insight_id = %updated.id, tier = %updated.tier(), "Insight updated");
            Ok(updated)
        }
        None => {
            let insight = Insight {
                id: Uuid::new_v4(),
                scope: candidate.scope,
                category: candidate.category,
                summary_simple: candidate.summary_simple,
                summary_detailed: candidate.summary_detailed,
                detail: candidate.detail,
                confidence: candidate.confidence,
                sample_size: candidate.sample_size,
                strength: candidate.strength,
                significance: candidate.significance,
                date_range: candidate.date_range,
                pattern_link: candidate.pattern_link,
                clinically_validated: false,
                validation_count: 0,
                active: true,
                surfaced_at: None,
                created_at: now,
                updated_at: now,
            };
            repository::insert_insight(conn, &insight)?;
            tracing::info!(insight_id = %insight.id, tier = %insight.tier(), "Insight created");
            Ok(insight)
        }
    }
}

/// Refresh the cohort-tier insight for a cohort pattern. No child reference
/// is ever attached. Must run inside a transaction the caller owns.
pub fn refresh_cohort_insight(
    conn: &Connection,
    cohort: &CohortDefinition,
    pattern: &CohortPattern,
    now: NaiveDateTime,
) -> Result<Insight, AnalysisError> {
    if pattern.families_affected < cohort.min_members {
        return Err(AnalysisError::CohortPrivacyFloor {
            cohort_id: cohort.id.to_string(),
            members: pattern.families_affected,
            floor: cohort.min_members,
        });
    }
    let scope = InsightScope::Cohort {
        cohort_id: cohort.id,
        families_affected: pattern.families_affected,
        families_total: pattern.families_total,
    };
    upsert_insight(conn, cohort_candidate(scope, pattern), now)
}

/// Promote a cohort pattern's insight to the global tier.
///
/// The existing cohort insight for the pattern (if any) becomes global in
/// place, so the pattern still backs exactly one active insight.
pub fn promote_cohort_pattern_to_global(
    conn: &Connection,
    cohort_pattern_id: &Uuid,
    now: NaiveDateTime,
) -> Result<Insight, AnalysisError> {
    let pattern =
        repository::get_cohort_pattern(conn, cohort_pattern_id).map_err(AnalysisError::from_store)?;
    if !pattern.active {
        return Err(AnalysisError::InvalidTransition {
            entity: "CohortPattern".into(),
            id: pattern.id.to_string(),
            from: "inactive".into(),
            to: "global".into(),
        });
    }
    let cohort = repository::get_cohort_definition(conn, &pattern.cohort_id)
        .map_err(AnalysisError::from_store)?;
    if pattern.families_affected < cohort.min_members {
        return Err(AnalysisError::CohortPrivacyFloor {
            cohort_id: cohort.id.to_string(),
            members: pattern.families_affected,
            floor: cohort.min_members,
        });
    }

    let tx = conn.unchecked_transaction().map_err(crate::db::DatabaseError::from)?;
    let insight = upsert_insight(&tx, cohort_candidate(InsightScope::Global, &pattern), now)?;
    tx.commit().map_err(crate::db::DatabaseError::from)?;

    tracing::info!(
        cohort_pattern_id = %pattern.id,
        insight_id = %insight.id,
        "Cohort pattern promoted to global insight"
    );
    Ok(insight)
}

/// Hand-written global insight content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedInsight {
    pub category: InsightCategory,
    pub summary_simple: String,
    pub summary_detailed: String,
    pub source: String,
    pub references: Vec<String>,
    pub confidence: f64,
}

pub fn create_curated_insight(
    conn: &Connection,
    curated: CuratedInsight,
    now: NaiveDateTime,
) -> Result<Insight, AnalysisError> {
    if curated.summary_simple.trim().is_empty() {
        return Err(AnalysisError::InvalidInput("curated insight needs a summary".into()));
    }
    if !(0.0..=1.0).contains(&curated.confidence) {
        return Err(AnalysisError::InvalidInput(format!(
            "confidence out of range: {}",
            curated.confidence
        )));
    }
    let candidate = InsightCandidate {
        scope: InsightScope::Global,
        category: curated.category,
        summary_simple: curated.summary_simple,
        summary_detailed: curated.summary_detailed,
        detail: InsightDetail::Curated {
            source: curated.source,
            references: curated.references,
        },
        confidence: curated.confidence,
        sample_size: 0,
        strength: None,
        significance: None,
        date_range: None,
        pattern_link: None,
    };
    upsert_insight(conn, candidate, now)
}

// ═══════════════════════════════════════════════════════════
// Counters
// ═══════════════════════════════════════════════════════════

pub fn increment_validation(conn: &Connection, insight_id: &Uuid) -> Result<(), AnalysisError> {
    repository::increment_validation_count(conn, insight_id).map_err(AnalysisError::from_store)
}

/// Append-only: nothing in the engine clears the flag.
pub fn set_clinically_validated(conn: &Connection, insight_id: &Uuid) -> Result<(), AnalysisError> {
    repository::set_clinically_validated(conn, insight_id).map_err(AnalysisError::from_store)
}

/// Record that an insight was shown to a caregiver. Later calls keep the
/// first time.
pub fn mark_insight_surfaced(
    conn: &Connection,
    insight_id: &Uuid,
    now: NaiveDateTime,
) -> Result<(), AnalysisError> {
    repository::mark_insight_surfaced(conn, insight_id, now).map_err(AnalysisError::from_store)
}
