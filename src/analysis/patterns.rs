//! Pattern store and merger.
//!
//! A significant correlation becomes a family pattern. Later results for the
//! same (child, input, output, lag bucket) either merge into it or, when they
//! point the other way, retire it. A retired pattern is never flipped in place.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::repository;
use crate::models::enums::RetirementReason;
use crate::models::{lag_bucket, DateRange, FactorCorrelation, FamilyPattern, Insight, PatternLink};

use super::insights::{individual_candidate, upsert_insight};
use super::AnalysisError;

/// What `upsert_pattern` did with a result.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Created(FamilyPattern),
    Merged(FamilyPattern),
    /// The active pattern pointed the other way and was retired.
    Contradicted {
        retired: FamilyPattern,
        new_strength: f64,
    },
    /// An active pattern exists but the result neither agrees nor contradicts.
    Inconclusive,
    /// No active pattern and the result is not significant enough to start one.
    BelowThreshold,
}

impl MergeOutcome {
    /// The pattern that is active after the merge, if any.
    pub fn active_pattern(&self) -> Option<&FamilyPattern> {
        match self {
            Self::Created(p) | Self::Merged(p) => Some(p),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Merged(_) => "merged",
            Self::Contradicted { .. } => "contradicted",
            Self::Inconclusive => "inconclusive",
            Self::BelowThreshold => "below_threshold",
        }
    }
}

/// Whether a result may start a new pattern.
pub fn is_significant(result: &FactorCorrelation, config: &EngineConfig) -> bool {
    result.significance >= config.significance_threshold
        && result.strength.abs() >= config.min_pattern_strength
}

fn same_sign(a: f64, b: f64) -> bool {
    (a >= 0.0) == (b >= 0.0)
}

fn weighted(a: f64, na: u32, b: f64, nb: u32) -> f64 {
    let total = na as f64 + nb as f64;
    if total <= 0.0 {
        return b;
    }
    (a * na as f64 + b * nb as f64) / total
}

/// Fold a correlation result into the child's patterns.
///
/// Must run inside a transaction the caller owns; see
/// [`record_correlation_result`] for the standalone form.
pub fn upsert_pattern(
    conn: &Connection,
    child_id: &Uuid,
    source_request_id: Option<Uuid>,
    result: &FactorCorrelation,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<MergeOutcome, AnalysisError> {
    let bucket = lag_bucket(result.lag_hours);
    let existing = repository::find_active_pattern(
        conn,
        child_id,
        &result.input_factor,
        &result.output_factor,
        bucket,
    )?;

    let Some(mut pattern) = existing else {
        if !is_significant(result, config) {
            return Ok(MergeOutcome::BelowThreshold);
        }
        let pattern = FamilyPattern {
            id: Uuid::new_v4(),
            child_id: *child_id,
            input_factor: result.input_factor.clone(),
            output_factor: result.output_factor.clone(),
            strength: result.strength,
            confidence: result.confidence,
            sample_size: result.paired_samples,
            lag_hours: result.lag_hours,
            source_request_id,
            first_detected_at: now,
            last_confirmed_at: now,
            times_confirmed: 1,
            active: true,
            deactivated_at: None,
            deactivation_reason: None,
        };
        repository::insert_pattern(conn, &pattern)?;
        tracing::info!(
            pattern_id = %pattern.id,
            child_id = %child_id,
            input = %pattern.input_factor,
            output = %pattern.output_factor,
            strength = pattern.strength,
            "Family pattern created"
        );
        return Ok(MergeOutcome::Created(pattern));
    };

    let new_r = result.strength;

    if same_sign(pattern.strength, new_r) {
        if (pattern.strength - new_r).abs() > config.merge_tolerance {
            return Ok(MergeOutcome::Inconclusive);
        }
        let n_old = pattern.sample_size;
        let n_new = result.paired_samples;
        pattern.strength = weighted(pattern.strength, n_old, new_r, n_new).clamp(-1.0, 1.0);
        pattern.confidence = weighted(pattern.confidence, n_old, result.confidence, n_new);
        pattern.sample_size = n_old + n_new;
        pattern.times_confirmed += 1;
        pattern.last_confirmed_at = now;
        pattern.source_request_id = source_request_id.or(pattern.source_request_id);
        repository::update_merged_pattern(conn, &pattern)?;
        tracing::info!(
            pattern_id = %pattern.id,
            times_confirmed = pattern.times_confirmed,
            strength = pattern.strength,
            "Family pattern confirmed"
        );
        return Ok(MergeOutcome::Merged(pattern));
    }

    if new_r.abs() < config.contradiction_materiality {
        return Ok(MergeOutcome::Inconclusive);
    }

    repository::deactivate_pattern(conn, &pattern.id, RetirementReason::Contradicted, now)?;
    let retired_insights =
        repository::deactivate_insights_for_link(conn, &PatternLink::Family(pattern.id), now)?;
    let audit = AnalysisError::ContradictoryPattern {
        pattern_id: pattern.id.to_string(),
        new_strength: new_r,
    };
    tracing::warn!(
        pattern_id = %pattern.id,
        child_id = %child_id,
        stored_strength = pattern.strength,
        new_strength = new_r,
        retired_insights,
        "{audit}"
    );

    pattern.active = false;
    pattern.deactivated_at = Some(now);
    pattern.deactivation_reason = Some(RetirementReason::Contradicted);
    Ok(MergeOutcome::Contradicted {
        retired: pattern,
        new_strength: new_r,
    })
}

/// Pattern merge plus the individual insight it backs.
///
/// Must run inside a transaction the caller owns.
pub fn apply_correlation_result(
    conn: &Connection,
    child_id: &Uuid,
    source_request_id: Option<Uuid>,
    result: &FactorCorrelation,
    date_range: Option<DateRange>,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<(MergeOutcome, Option<Insight>), AnalysisError> {
    let outcome = upsert_pattern(conn, child_id, source_request_id, result, now, config)?;
    let insight = match outcome.active_pattern() {
        Some(pattern) => {
            let candidate = individual_candidate(pattern, result.significance, date_range);
            Some(upsert_insight(conn, candidate, now)?)
        }
        None => None,
    };
    Ok((outcome, insight))
}

/// [`apply_correlation_result`] in its own IMMEDIATE transaction.
pub fn record_correlation_result(
    conn: &Connection,
    child_id: &Uuid,
    source_request_id: Option<Uuid>,
    result: &FactorCorrelation,
    date_range: Option<DateRange>,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<(MergeOutcome, Option<Insight>), AnalysisError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(crate::db::DatabaseError::from)?;
    let applied =
        apply_correlation_result(&tx, child_id, source_request_id, result, date_range, now, config)?;
    tx.commit().map_err(crate::db::DatabaseError::from)?;
    Ok(applied)
}

/// Retire a pattern by hand (administrative). Its insight goes with it.
pub fn retire_pattern(
    conn: &Connection,
    pattern_id: &Uuid,
    now: NaiveDateTime,
) -> Result<bool, AnalysisError> {
    let tx = conn.unchecked_transaction().map_err(crate::db::DatabaseError::from)?;
    let retired =
        repository::deactivate_pattern(&tx, pattern_id, RetirementReason::Administrative, now)?;
    if retired {
        repository::deactivate_insights_for_link(&tx, &PatternLink::Family(*pattern_id), now)?;
        tracing::info!(pattern_id = %pattern_id, "Family pattern retired by administrator");
    }
    tx.commit().map_err(crate::db::DatabaseError::from)?;
    Ok(retired)
}
