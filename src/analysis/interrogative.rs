//! Treatment-change interrogatives: `pending → prompted → answered`.
//!
//! A change is recorded as pending, promoted to prompted once the caregiver's
//! preferences allow it, and answered when the caregiver says whether it was
//! related to an insight. Waiting for an answer holds no lock.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::db::{repository, DatabaseError};
use crate::models::enums::InterrogativeStatus;
use crate::models::{
    InteractionPreferences, NewTreatmentChange, ResponseInput, TreatmentChange,
    TreatmentChangeResponse,
};

use super::AnalysisError;

pub fn record_treatment_change(
    conn: &Connection,
    input: NewTreatmentChange,
    now: NaiveDateTime,
) -> Result<TreatmentChange, AnalysisError> {
    let description = input.description.trim();
    if description.is_empty() {
        return Err(AnalysisError::InvalidInput("treatment change needs a description".into()));
    }

    let hours_since_insight = match input.related_insight_id {
        Some(insight_id) => {
            let insight =
                repository::get_insight(conn, &insight_id).map_err(AnalysisError::from_store)?;
            insight
                .surfaced_at
                .map(|shown| (input.changed_at - shown).num_hours())
        }
        None => None,
    };

    let change = TreatmentChange {
        id: Uuid::new_v4(),
        child_id: input.child_id,
        caregiver_id: input.caregiver_id,
        change_type: input.change_type,
        description: description.to_string(),
        changed_at: input.changed_at,
        related_insight_id: input.related_insight_id,
        hours_since_insight,
        interrogative_status: InterrogativeStatus::Pending,
        prompted_at: None,
        answered_at: None,
        created_at: now,
    };
    repository::insert_treatment_change(conn, &change)?;

    tracing::info!(
        change_id = %change.id,
        child_id = %change.child_id,
        change_type = %change.change_type,
        "Treatment change recorded"
    );
    Ok(change)
}

/// Why a pending change is not prompted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    Disabled,
    Delay,
    QuietHours,
    NotPreferredDay,
    DailyCap,
}

fn hold_for(
    conn: &Connection,
    change: &TreatmentChange,
    prefs: &InteractionPreferences,
    now: NaiveDateTime,
) -> Result<Option<Hold>, DatabaseError> {
    if !prefs.interrogatives_enabled {
        return Ok(Some(Hold::Disabled));
    }
    if now < change.changed_at + Duration::hours(i64::from(prefs.delay_hours_after_change)) {
        return Ok(Some(Hold::Delay));
    }
    if prefs.in_quiet_hours(now) {
        return Ok(Some(Hold::QuietHours));
    }
    if !prefs.is_preferred_day(now) {
        return Ok(Some(Hold::NotPreferredDay));
    }
    let sent = repository::count_prompted_since(conn, &change.caregiver_id, now - Duration::hours(24))?;
    if sent >= prefs.max_interrogatives_per_day {
        return Ok(Some(Hold::DailyCap));
    }
    Ok(None)
}

/// Move every eligible pending change to `prompted`. Returns the ids prompted.
///
/// Eligibility is checked per caregiver: prompting enabled, the post-change
/// delay elapsed, outside quiet hours, on a preferred day, and under the
/// rolling 24-hour cap. Oldest changes go first.
pub fn promote_due_prompts(
    conn: &Connection,
    now: NaiveDateTime,
) -> Result<Vec<Uuid>, AnalysisError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(DatabaseError::from)?;

    let mut prefs_cache: HashMap<Uuid, InteractionPreferences> = HashMap::new();
    let mut prompted = Vec::new();
    let mut held = 0usize;

    for change in repository::list_pending_interrogatives(&tx)? {
        let prefs = match prefs_cache.get(&change.caregiver_id) {
            Some(p) => p.clone(),
            None => {
                let p = repository::get_interaction_preferences_or_default(&tx, &change.caregiver_id)?;
                prefs_cache.insert(change.caregiver_id, p.clone());
                p
            }
        };

        if let Some(hold) = hold_for(&tx, &change, &prefs, now)? {
            tracing::trace!(change_id = %change.id, ?hold, "Interrogative held");
            held += 1;
            continue;
        }
        if repository::mark_prompted(&tx, &change.id, now)? {
            prompted.push(change.id);
        }
    }

    tx.commit().map_err(DatabaseError::from)?;

    if !prompted.is_empty() {
        tracing::info!(prompted = prompted.len(), held, "Interrogatives prompted");
    }
    Ok(prompted)
}

/// Record the caregiver's answer. Only a prompted change can be answered.
pub fn answer_treatment_change(
    conn: &Connection,
    change_id: &Uuid,
    input: ResponseInput,
    now: NaiveDateTime,
) -> Result<TreatmentChangeResponse, AnalysisError> {
    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;

    let change = repository::get_treatment_change(&tx, change_id).map_err(AnalysisError::from_store)?;
    let invalid = |from: InterrogativeStatus| AnalysisError::InvalidTransition {
        entity: "TreatmentChange".into(),
        id: change_id.to_string(),
        from: from.to_string(),
        to: InterrogativeStatus::Answered.to_string(),
    };
    if change.interrogative_status != InterrogativeStatus::Prompted {
        return Err(invalid(change.interrogative_status));
    }
    if !repository::mark_answered(&tx, change_id, now)? {
        return Err(invalid(change.interrogative_status));
    }

    let response = TreatmentChangeResponse {
        id: Uuid::new_v4(),
        treatment_change_id: *change_id,
        related_to_analysis: input.related_to_analysis,
        prompted_by: input.prompted_by,
        notes: input
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        responded_at: now,
    };
    repository::insert_response(&tx, &response)?;
    tx.commit().map_err(DatabaseError::from)?;

    tracing::info!(
        change_id = %change_id,
        related_to_analysis = response.related_to_analysis,
        "Interrogative answered"
    );
    Ok(response)
}

pub fn update_interaction_preferences(
    conn: &Connection,
    prefs: &InteractionPreferences,
    now: NaiveDateTime,
) -> Result<(), AnalysisError> {
    repository::set_interaction_preferences(conn, prefs, now).map_err(|e| match e {
        DatabaseError::ConstraintViolation(msg) => AnalysisError::InvalidInput(msg),
        other => AnalysisError::from(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::insights::{create_curated_insight, mark_insight_surfaced, CuratedInsight};
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::{ChangeType, InsightCategory, PromptSource};
    use chrono::{Datelike, NaiveDate};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 4, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn change_for(conn: &Connection, caregiver: Uuid, changed_at: NaiveDateTime) -> TreatmentChange {
        record_treatment_change(
            conn,
            NewTreatmentChange {
                child_id: Uuid::new_v4(),
                caregiver_id: caregiver,
                change_type: ChangeType::DoseAdjusted,
                description: "Melatonin raised to 3mg".into(),
                changed_at,
                related_insight_id: None,
            },
            changed_at,
        )
        .unwrap()
    }

    fn answer(related: bool) -> ResponseInput {
        ResponseInput {
            related_to_analysis: related,
            prompted_by: PromptSource::Insight,
            notes: Some("  saw the sleep insight ".into()),
        }
    }

    #[test]
    fn prompt_waits_for_delay() {
        let conn = open_memory_database().unwrap();
        let change = change_for(&conn, Uuid::new_v4(), at(1, 10));

        // Default delay is 48h.
        assert!(promote_due_prompts(&conn, at(2, 12)).unwrap().is_empty());
        assert!(promote_due_prompts(&conn, at(3, 9)).unwrap().is_empty());
        assert_eq!(promote_due_prompts(&conn, at(3, 12)).unwrap(), vec![change.id]);

        let stored = repository::get_treatment_change(&conn, &change.id).unwrap();
        assert_eq!(stored.interrogative_status, InterrogativeStatus::Prompted);
        assert_eq!(stored.prompted_at, Some(at(3, 12)));
    }

    #[test]
    fn daily_cap_is_rolling_per_caregiver() {
        let conn = open_memory_database().unwrap();
        let caregiver = Uuid::new_v4();
        let first = change_for(&conn, caregiver, at(1, 9));
        let second = change_for(&conn, caregiver, at(1, 10));
        let third = change_for(&conn, caregiver, at(1, 11));
        let other = change_for(&conn, Uuid::new_v4(), at(1, 12));

        let prompted = promote_due_prompts(&conn, at(4, 12)).unwrap();
        assert_eq!(prompted, vec![first.id, second.id, other.id]);

        // Still inside the 24h window.
        assert!(promote_due_prompts(&conn, at(5, 11)).unwrap().is_empty());
        assert_eq!(promote_due_prompts(&conn, at(5, 13)).unwrap(), vec![third.id]);
    }

    #[test]
    fn quiet_hours_and_days_hold_prompts() {
        let conn = open_memory_database().unwrap();
        let caregiver = Uuid::new_v4();
        let change = change_for(&conn, caregiver, at(1, 9));

        // Default quiet hours 21 → 8.
        assert!(promote_due_prompts(&conn, at(4, 22)).unwrap().is_empty());
        assert!(promote_due_prompts(&conn, at(5, 7)).unwrap().is_empty());

        let mut prefs = InteractionPreferences::defaults_for(caregiver);
        prefs.preferred_days = vec![at(6, 12).weekday()];
        update_interaction_preferences(&conn, &prefs, at(1, 9)).unwrap();
        assert!(promote_due_prompts(&conn, at(5, 12)).unwrap().is_empty());
        assert_eq!(promote_due_prompts(&conn, at(6, 12)).unwrap(), vec![change.id]);
    }

    #[test]
    fn disabled_caregiver_is_never_prompted() {
        let conn = open_memory_database().unwrap();
        let caregiver = Uuid::new_v4();
        change_for(&conn, caregiver, at(1, 9));
        let mut prefs = InteractionPreferences::defaults_for(caregiver);
        prefs.interrogatives_enabled = false;
        update_interaction_preferences(&conn, &prefs, at(1, 9)).unwrap();
        assert!(promote_due_prompts(&conn, at(10, 12)).unwrap().is_empty());
    }

    #[test]
    fn answer_requires_prompted() {
        let conn = open_memory_database().unwrap();
        let change = change_for(&conn, Uuid::new_v4(), at(1, 9));

        let err = answer_treatment_change(&conn, &change.id, answer(true), at(2, 9)).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTransition { ref from, .. } if from == "pending"));

        promote_due_prompts(&conn, at(4, 12)).unwrap();
        let response = answer_treatment_change(&conn, &change.id, answer(true), at(4, 13)).unwrap();
        assert!(response.related_to_analysis);
        assert_eq!(response.notes.as_deref(), Some("saw the sleep insight"));
        assert_eq!(
            repository::get_response_for_change(&conn, &change.id).unwrap(),
            Some(response)
        );

        let again = answer_treatment_change(&conn, &change.id, answer(false), at(4, 14)).unwrap_err();
        assert_eq!(again.kind(), "invalid_transition");
    }

    #[test]
    fn answer_missing_change_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = answer_treatment_change(&conn, &Uuid::new_v4(), answer(false), at(1, 9)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn hours_since_insight_counts_from_surfacing() {
        let conn = open_memory_database().unwrap();
        let insight = create_curated_insight(
            &conn,
            CuratedInsight {
                category: InsightCategory::Sleep,
                summary_simple: "Earlier bedtimes".into(),
                summary_detailed: "Earlier bedtimes often help.".into(),
                source: "clinical_review".into(),
                references: vec![],
                confidence: 0.7,
            },
            at(1, 8),
        )
        .unwrap();
        mark_insight_surfaced(&conn, &insight.id, at(1, 9)).unwrap();

        let change = record_treatment_change(
            &conn,
            NewTreatmentChange {
                child_id: Uuid::new_v4(),
                caregiver_id: Uuid::new_v4(),
                change_type: ChangeType::TherapyChanged,
                description: "Moved bedtime earlier".into(),
                changed_at: at(2, 15),
                related_insight_id: Some(insight.id),
            },
            at(2, 16),
        )
        .unwrap();
        assert_eq!(change.hours_since_insight, Some(30));
    }

    #[test]
    fn invalid_preferences_rejected() {
        let conn = open_memory_database().unwrap();
        let mut prefs = InteractionPreferences::defaults_for(Uuid::new_v4());
        prefs.quiet_start_hour = 24;
        let err = update_interaction_preferences(&conn, &prefs, at(1, 9)).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
