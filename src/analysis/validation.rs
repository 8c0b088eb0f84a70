use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{repository, DatabaseError};
use crate::models::enums::{InterrogativeStatus, ValidationType};
use crate::models::{ClinicalValidation, InsightScope, NewClinicalValidation, PatternLink, ValidationStats};

use super::AnalysisError;

/// Resolve the insight a validation should count towards: the one named
/// directly, or the active insight backed by the validated pattern.
///
/// Only the child's own individual insights qualify. Cohort and global
/// insights belong to no single family.
fn target_insight(
    conn: &Connection,
    input: &NewClinicalValidation,
) -> Result<Option<Uuid>, AnalysisError> {
    if let Some(insight_id) = input.insight_id {
        let insight = repository::get_insight(conn, &insight_id).map_err(AnalysisError::from_store)?;
        return match insight.scope {
            InsightScope::Individual { child_id } if child_id == input.child_id => Ok(Some(insight.id)),
            InsightScope::Individual { .. } => Err(AnalysisError::InvalidInput(format!(
                "insight {insight_id} belongs to another child"
            ))),
            InsightScope::Cohort { .. } | InsightScope::Global => {
                Err(AnalysisError::InvalidInput(format!(
                    "{} insight {insight_id} cannot be validated for one child",
                    insight.tier()
                )))
            }
        };
    }
    match input.pattern_id {
        Some(pattern_id) => Ok(
            repository::find_active_insight_by_link(conn, &PatternLink::Family(pattern_id))?
                .map(|i| i.id),
        ),
        None => Ok(None),
    }
}

/// Store a provider or caregiver confirmation and bump the linked insight.
///
/// Only a provider confirmation sets the clinically-validated flag.
pub fn record_clinical_validation(
    conn: &Connection,
    input: NewClinicalValidation,
    now: NaiveDateTime,
) -> Result<ClinicalValidation, AnalysisError> {
    if input.validated_by.trim().is_empty() {
        return Err(AnalysisError::InvalidInput("validated_by is empty".into()));
    }
    if !(0.0..=1.0).contains(&input.validation_strength) {
        return Err(AnalysisError::InvalidInput(format!(
            "validation strength out of range: {}",
            input.validation_strength
        )));
    }
    if input.pattern_id.is_none() && input.insight_id.is_none() {
        return Err(AnalysisError::InvalidInput(
            "validation must name a pattern or an insight".into(),
        ));
    }
    if let Some(pattern_id) = input.pattern_id {
        let pattern = repository::get_pattern(conn, &pattern_id).map_err(AnalysisError::from_store)?;
        if pattern.child_id != input.child_id {
            return Err(AnalysisError::InvalidInput(format!(
                "pattern {pattern_id} belongs to another child"
            )));
        }
    }

    let insight_id = target_insight(conn, &input)?;
    let caregiver_confirmed = input.validation_type == ValidationType::CaregiverReported;

    let validation = ClinicalValidation {
        id: Uuid::new_v4(),
        child_id: input.child_id,
        pattern_id: input.pattern_id,
        insight_id,
        validation_type: input.validation_type,
        validated_by: input.validated_by.trim().to_string(),
        treatment_changed: input.treatment_changed,
        description: input.description,
        caregiver_confirmed,
        caregiver_confirmed_at: caregiver_confirmed.then_some(now),
        validation_strength: input.validation_strength,
        expires_at: input.expires_at,
        created_at: now,
    };

    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
    repository::insert_clinical_validation(&tx, &validation)?;
    if let Some(id) = insight_id {
        repository::increment_validation_count(&tx, &id)?;
        if validation.validation_type.is_clinical() {
            repository::set_clinically_validated(&tx, &id)?;
        }
    }
    tx.commit().map_err(DatabaseError::from)?;

    tracing::info!(
        validation_id = %validation.id,
        child_id = %validation.child_id,
        validation_type = %validation.validation_type,
        "Clinical validation recorded"
    );
    Ok(validation)
}

pub fn get_validation_stats(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<ValidationStats, AnalysisError> {
    let (total_validations, clinical_validations, average_validation_strength) =
        repository::validation_totals(conn, child_id)?;
    let by_status = repository::count_interrogatives_by_status(conn, child_id)?;
    let count = |s: InterrogativeStatus| by_status.get(&s).copied().unwrap_or(0);

    Ok(ValidationStats {
        total_validations,
        clinical_validations,
        average_validation_strength,
        clinically_validated_insights: repository::count_clinically_validated_insights(conn, child_id)?,
        treatment_changes: by_status.values().sum(),
        pending_interrogatives: count(InterrogativeStatus::Pending),
        prompted_interrogatives: count(InterrogativeStatus::Prompted),
        answered_interrogatives: count(InterrogativeStatus::Answered),
        related_to_analysis: repository::count_related_responses(conn, child_id)?,
    })
}
