//! Read surface for the alert correlator.

use std::collections::HashSet;

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository;
use crate::models::{ChildProfile, FamilyPattern, Insight, InsightScope};

use super::cohort::{check_privacy_floor, CohortHasher};
use super::AnalysisError;

/// Active family patterns for a child, strongest first.
pub fn get_active_patterns(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<Vec<FamilyPattern>, AnalysisError> {
    Ok(repository::list_active_patterns(conn, child_id)?)
}

/// Every insight applicable to a child: its own, those of the cohorts it is a
/// member of, then global ones.
///
/// Cohort insights are only included for cohorts at or above their privacy
/// floor, and only when enough families stand behind the insight itself.
pub fn get_insights_for_child(
    conn: &Connection,
    hasher: &CohortHasher,
    child_id: &Uuid,
    profile: &ChildProfile,
) -> Result<Vec<Insight>, AnalysisError> {
    let mut insights = repository::list_individual_insights(conn, child_id)?;

    let member_hash = hasher.compute_child_hash(profile);
    for cohort_id in repository::list_cohorts_for_member(conn, &member_hash)? {
        let cohort = repository::get_cohort_definition(conn, &cohort_id)?;
        if check_privacy_floor(conn, &cohort).is_err() {
            continue;
        }
        insights.extend(
            repository::list_cohort_insights(conn, &cohort_id)?
                .into_iter()
                .filter(|i| match i.scope {
                    InsightScope::Cohort { families_affected, .. } => {
                        families_affected >= cohort.min_members
                    }
                    _ => false,
                }),
        );
    }

    insights.extend(repository::list_global_insights(conn)?);

    let mut seen = HashSet::new();
    insights.retain(|i| seen.insert(i.id));
    Ok(insights)
}
