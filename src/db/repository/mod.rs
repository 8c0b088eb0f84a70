//! Repository layer: entity-scoped database operations.
//!
//! Every function takes a borrowed `Connection` so callers decide the
//! transaction boundary. All public functions are re-exported here.

mod baseline;
mod cohort;
mod correlation;
mod insight;
mod observation;
mod pattern;
mod preference;
mod treatment;
mod validation;

pub use baseline::*;
pub use cohort::*;
pub use correlation::*;
pub use insight::*;
pub use observation::*;
pub use pattern::*;
pub use preference::*;
pub use treatment::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::db::DatabaseError;
    use crate::models::enums::*;
    use crate::models::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use rusqlite::Connection;
    use uuid::Uuid;

    fn test_db() -> Connection {
        open_memory_database().unwrap()
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    // ═══════════════════════════════════════════
    // Observations & baselines
    // ═══════════════════════════════════════════

    #[test]
    fn fetch_series_respects_range_and_order() {
        let conn = test_db();
        let child = Uuid::new_v4();
        insert_observation(&conn, &child, "sleep_minutes", ts("2026-03-03 07:00:00"), 480.0).unwrap();
        insert_observation(&conn, &child, "sleep_minutes", ts("2026-03-01 07:00:00"), 420.0).unwrap();
        insert_observation(&conn, &child, "sleep_minutes", ts("2026-03-05 07:00:00"), 500.0).unwrap();
        insert_observation(&conn, &child, "mood_level", ts("2026-03-02 18:00:00"), 3.0).unwrap();

        let range = DateRange::new(d("2026-03-01"), d("2026-03-03"));
        let series = fetch_series(&conn, &child, "sleep_minutes", &range).unwrap();
        let values: Vec<f64> = series.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![420.0, 480.0]);

        let all = fetch_all_series(&conn, &child, &range).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["mood_level"].len(), 1);
    }

    fn baseline(child: Uuid, computed_at: NaiveDateTime, mean: f64) -> Baseline {
        Baseline {
            id: Uuid::new_v4(),
            child_id: child,
            metric: "sleep_minutes".into(),
            mean,
            std_dev: 30.0,
            sample_size: 14,
            computed_at,
            valid_until: computed_at + Duration::days(7),
            superseded_at: None,
        }
    }

    #[test]
    fn new_baseline_supersedes_previous() {
        let conn = test_db();
        let child = Uuid::new_v4();
        let first = baseline(child, ts("2026-03-01 00:00:00"), 450.0);
        let second = baseline(child, ts("2026-03-05 00:00:00"), 470.0);
        insert_baseline_superseding(&conn, &first).unwrap();
        insert_baseline_superseding(&conn, &second).unwrap();

        let current = get_current_baseline(&conn, &child, "sleep_minutes").unwrap().unwrap();
        assert_eq!(current.id, second.id);

        let history = list_baseline_history(&conn, &child, "sleep_minutes").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].id, first.id);
        assert_eq!(history[1].superseded_at, Some(second.computed_at));
    }

    #[test]
    fn expired_baseline_is_not_valid() {
        let conn = test_db();
        let child = Uuid::new_v4();
        let b = baseline(child, ts("2026-03-01 00:00:00"), 450.0);
        insert_baseline_superseding(&conn, &b).unwrap();

        assert!(get_valid_baseline(&conn, &child, "sleep_minutes", ts("2026-03-07 23:00:00"))
            .unwrap()
            .is_some());
        assert!(get_valid_baseline(&conn, &child, "sleep_minutes", ts("2026-03-08 00:00:00"))
            .unwrap()
            .is_none());
    }

    // ═══════════════════════════════════════════
    // Correlation requests
    // ═══════════════════════════════════════════

    fn request(queued_at: NaiveDateTime) -> CorrelationRequest {
        CorrelationRequest {
            id: Uuid::new_v4(),
            child_id: Uuid::new_v4(),
            requested_by: "caregiver".into(),
            input_factors: vec!["sleep_minutes".into()],
            output_factors: vec!["mood_level".into()],
            date_range: DateRange::new(d("2026-03-01"), d("2026-03-10")),
            lag_hours: 24,
            status: RequestStatus::Pending,
            result: None,
            error_kind: None,
            error_detail: None,
            queued_at,
            started_at: None,
            completed_at: None,
            claimed_by: None,
            reclaim_count: 0,
            pattern_ids: Vec::new(),
        }
    }

    #[test]
    fn request_claim_is_exclusive() {
        let conn = test_db();
        let req = request(ts("2026-03-11 08:00:00"));
        insert_correlation_request(&conn, &req).unwrap();

        assert!(claim_request(&conn, &req.id, "worker-a", ts("2026-03-11 08:00:05")).unwrap());
        assert!(!claim_request(&conn, &req.id, "worker-b", ts("2026-03-11 08:00:06")).unwrap());

        let stored = get_correlation_request(&conn, &req.id).unwrap();
        assert_eq!(stored.status, RequestStatus::Processing);
        assert_eq!(stored.claimed_by.as_deref(), Some("worker-a"));
    }

    #[test]
    fn only_claim_holder_completes() {
        let conn = test_db();
        let req = request(ts("2026-03-11 08:00:00"));
        insert_correlation_request(&conn, &req).unwrap();
        claim_request(&conn, &req.id, "worker-a", ts("2026-03-11 08:00:05")).unwrap();

        let outcome = CorrelationOutcome::default();
        assert!(!complete_request(&conn, &req.id, "worker-b", &outcome, ts("2026-03-11 08:01:00")).unwrap());
        assert!(complete_request(&conn, &req.id, "worker-a", &outcome, ts("2026-03-11 08:01:00")).unwrap());

        let stored = get_correlation_request(&conn, &req.id).unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert_eq!(stored.result, Some(outcome));
        assert!(!fail_request(&conn, &req.id, "worker-a", "x", "y", ts("2026-03-11 08:02:00")).unwrap());
    }

    #[test]
    fn stale_request_reclaimed_once() {
        let conn = test_db();
        let req = request(ts("2026-03-11 08:00:00"));
        insert_correlation_request(&conn, &req).unwrap();
        claim_request(&conn, &req.id, "worker-a", ts("2026-03-11 08:00:00")).unwrap();

        let cutoff = ts("2026-03-11 08:10:00");
        assert_eq!(list_stale_processing_ids(&conn, cutoff).unwrap(), vec![req.id]);
        assert!(reclaim_request(&conn, &req.id, cutoff).unwrap());
        assert!(!reclaim_request(&conn, &req.id, cutoff).unwrap());

        let stored = get_correlation_request(&conn, &req.id).unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(stored.reclaim_count, 1);
        assert!(stored.claimed_by.is_none());
    }

    #[test]
    fn pending_ids_oldest_first_and_status_counts() {
        let conn = test_db();
        let newer = request(ts("2026-03-11 09:00:00"));
        let older = request(ts("2026-03-11 08:00:00"));
        insert_correlation_request(&conn, &newer).unwrap();
        insert_correlation_request(&conn, &older).unwrap();

        assert_eq!(list_pending_request_ids(&conn, 10).unwrap(), vec![older.id, newer.id]);
        assert_eq!(list_pending_request_ids(&conn, 1).unwrap(), vec![older.id]);

        claim_request(&conn, &older.id, "w", ts("2026-03-11 09:30:00")).unwrap();
        let counts = count_requests_by_status(&conn).unwrap();
        assert_eq!(counts.get(&RequestStatus::Pending), Some(&1));
        assert_eq!(counts.get(&RequestStatus::Processing), Some(&1));
    }

    #[test]
    fn missing_request_is_not_found() {
        let conn = test_db();
        let err = get_correlation_request(&conn, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    // ═══════════════════════════════════════════
    // Family patterns
    // ═══════════════════════════════════════════

    fn pattern(child: Uuid, strength: f64, lag_hours: i64) -> FamilyPattern {
        let now = ts("2026-03-11 08:00:00");
        FamilyPattern {
            id: Uuid::new_v4(),
            child_id: child,
            input_factor: "sleep_minutes".into(),
            output_factor: "mood_level".into(),
            strength,
            confidence: 0.7,
            sample_size: 20,
            lag_hours,
            source_request_id: None,
            first_detected_at: now,
            last_confirmed_at: now,
            times_confirmed: 1,
            active: true,
            deactivated_at: None,
            deactivation_reason: None,
        }
    }

    #[test]
    fn find_active_pattern_matches_lag_bucket() {
        let conn = test_db();
        let child = Uuid::new_v4();
        let p = pattern(child, 0.6, 26);
        insert_pattern(&conn, &p).unwrap();

        let found = find_active_pattern(&conn, &child, "sleep_minutes", "mood_level", 1).unwrap();
        assert_eq!(found.map(|f| f.id), Some(p.id));
        assert!(find_active_pattern(&conn, &child, "sleep_minutes", "mood_level", 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn deactivated_pattern_keeps_history() {
        let conn = test_db();
        let child = Uuid::new_v4();
        let p = pattern(child, 0.6, 24);
        insert_pattern(&conn, &p).unwrap();

        let now = ts("2026-03-12 08:00:00");
        assert!(deactivate_pattern(&conn, &p.id, RetirementReason::Contradicted, now).unwrap());
        assert!(!deactivate_pattern(&conn, &p.id, RetirementReason::Contradicted, now).unwrap());

        assert!(list_active_patterns(&conn, &child).unwrap().is_empty());
        let history = list_pattern_history(&conn, &child).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].deactivation_reason, Some(RetirementReason::Contradicted));
        assert_eq!(history[0].deactivated_at, Some(now));

        let mut merged = p.clone();
        merged.times_confirmed = 2;
        assert!(update_merged_pattern(&conn, &merged).is_err());
    }

    #[test]
    fn active_patterns_strongest_first() {
        let conn = test_db();
        let child = Uuid::new_v4();
        let weak = pattern(child, 0.35, 0);
        let mut strong = pattern(child, -0.8, 0);
        strong.output_factor = "behavior_incidents".into();
        insert_pattern(&conn, &weak).unwrap();
        insert_pattern(&conn, &strong).unwrap();

        let listed = list_active_patterns(&conn, &child).unwrap();
        assert_eq!(listed[0].id, strong.id);
        assert_eq!(listed[1].id, weak.id);
    }

    // ═══════════════════════════════════════════
    // Insights
    // ═══════════════════════════════════════════

    fn insight(scope: InsightScope, link: Option<PatternLink>) -> Insight {
        let now = ts("2026-03-11 08:00:00");
        Insight {
            id: Uuid::new_v4(),
            scope,
            category: InsightCategory::Sleep,
            summary_simple: "Better sleep, better mood".into(),
            summary_detailed: "Sleep duration correlates with next-day mood".into(),
            detail: InsightDetail::Curated {
                source: "test".into(),
                references: vec![],
            },
            confidence: 0.6,
            sample_size: 20,
            strength: Some(0.6),
            significance: Some(0.97),
            date_range: Some(DateRange::new(d("2026-03-01"), d("2026-03-10"))),
            pattern_link: link,
            clinically_validated: false,
            validation_count: 0,
            active: true,
            surfaced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insight_round_trips_through_storage() {
        let conn = test_db();
        let child = Uuid::new_v4();
        let link = PatternLink::Family(Uuid::new_v4());
        let i = insight(InsightScope::Individual { child_id: child }, Some(link));
        insert_insight(&conn, &i).unwrap();

        assert_eq!(get_insight(&conn, &i.id).unwrap(), i);
        assert_eq!(find_active_insight_by_link(&conn, &link).unwrap(), Some(i.clone()));
        assert_eq!(count_active_insights_for_link(&conn, &link).unwrap(), 1);
        assert_eq!(list_individual_insights(&conn, &child).unwrap().len(), 1);
    }

    #[test]
    fn individual_insight_requires_child_column() {
        let conn = test_db();
        let i = insight(InsightScope::Global, None);
        insert_insight(&conn, &i).unwrap();
        // A global row with a child id would violate the tier check.
        let result = conn.execute(
            "UPDATE insights SET child_id = 'x' WHERE id = ?1",
            [i.id.to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn content_update_preserves_counters() {
        let conn = test_db();
        let i = insight(InsightScope::Individual { child_id: Uuid::new_v4() }, None);
        insert_insight(&conn, &i).unwrap();
        increment_validation_count(&conn, &i.id).unwrap();
        set_clinically_validated(&conn, &i.id).unwrap();

        let mut changed = i.clone();
        changed.summary_simple = "Updated".into();
        changed.updated_at = ts("2026-03-12 08:00:00");
        update_insight_content(&conn, &changed).unwrap();

        let stored = get_insight(&conn, &i.id).unwrap();
        assert_eq!(stored.summary_simple, "Updated");
        assert_eq!(stored.created_at, i.created_at);
        assert_eq!(stored.validation_count, 1);
        assert!(stored.clinically_validated);
    }

    #[test]
    fn surfaced_keeps_first_time() {
        let conn = test_db();
        let i = insight(InsightScope::Global, None);
        insert_insight(&conn, &i).unwrap();
        mark_insight_surfaced(&conn, &i.id, ts("2026-03-12 08:00:00")).unwrap();
        mark_insight_surfaced(&conn, &i.id, ts("2026-03-13 08:00:00")).unwrap();
        assert_eq!(
            get_insight(&conn, &i.id).unwrap().surfaced_at,
            Some(ts("2026-03-12 08:00:00"))
        );
    }

    #[test]
    fn deactivating_link_hides_insight() {
        let conn = test_db();
        let cohort_id = Uuid::new_v4();
        let link = PatternLink::Cohort(Uuid::new_v4());
        let scope = InsightScope::Cohort {
            cohort_id,
            families_affected: 6,
            families_total: 10,
        };
        let i = insight(scope, Some(link));
        insert_insight(&conn, &i).unwrap();
        assert_eq!(list_cohort_insights(&conn, &cohort_id).unwrap().len(), 1);

        assert_eq!(deactivate_insights_for_link(&conn, &link, ts("2026-03-12 08:00:00")).unwrap(), 1);
        assert!(list_cohort_insights(&conn, &cohort_id).unwrap().is_empty());
        assert!(find_active_insight_by_link(&conn, &link).unwrap().is_none());
    }

    // ═══════════════════════════════════════════
    // Cohorts
    // ═══════════════════════════════════════════

    fn cohort(name: &str, min_members: u32) -> CohortDefinition {
        CohortDefinition {
            id: Uuid::new_v4(),
            name: name.into(),
            criteria: CohortCriteria {
                diagnoses: vec!["autism".into()],
                ..Default::default()
            },
            min_members,
            active: true,
            created_at: ts("2026-03-01 00:00:00"),
        }
    }

    #[test]
    fn cohort_definition_round_trip() {
        let conn = test_db();
        let c = cohort("autism-all-ages", 5);
        insert_cohort_definition(&conn, &c).unwrap();
        assert_eq!(get_cohort_definition(&conn, &c.id).unwrap(), c);
        assert_eq!(list_active_cohort_definitions(&conn).unwrap().len(), 1);

        set_cohort_active(&conn, &c.id, false).unwrap();
        assert!(list_active_cohort_definitions(&conn).unwrap().is_empty());
        assert!(set_cohort_active(&conn, &Uuid::new_v4(), true).is_err());
    }

    #[test]
    fn membership_upsert_is_idempotent() {
        let conn = test_db();
        let c = cohort("c", 5);
        insert_cohort_definition(&conn, &c).unwrap();
        let now = ts("2026-03-02 00:00:00");

        upsert_membership(&conn, &c.id, "key-a", "hash-a", 0.5, now).unwrap();
        upsert_membership(&conn, &c.id, "key-a", "hash-a", 1.0, now).unwrap();
        upsert_membership(&conn, &c.id, "key-b", "hash-b", 1.0, now).unwrap();
        assert_eq!(count_members(&conn, &c.id).unwrap(), 2);
        assert_eq!(list_member_hashes(&conn, &c.id).unwrap(), vec!["hash-a", "hash-b"]);
        assert_eq!(list_cohorts_for_member(&conn, "hash-a").unwrap(), vec![c.id]);

        assert!(delete_membership(&conn, &c.id, "hash-a").unwrap());
        assert!(!delete_membership(&conn, &c.id, "hash-a").unwrap());
        assert_eq!(count_members(&conn, &c.id).unwrap(), 1);
    }

    #[test]
    fn membership_key_replaces_stale_hash() {
        let conn = test_db();
        let c = cohort("c", 5);
        insert_cohort_definition(&conn, &c).unwrap();

        upsert_membership(&conn, &c.id, "key-a", "hash-old", 1.0, ts("2026-03-02 00:00:00")).unwrap();
        upsert_membership(&conn, &c.id, "key-a", "hash-new", 0.5, ts("2026-03-03 00:00:00")).unwrap();

        assert_eq!(count_members(&conn, &c.id).unwrap(), 1);
        assert_eq!(list_member_hashes(&conn, &c.id).unwrap(), vec!["hash-new"]);
        assert_eq!(list_cohorts_for_key(&conn, "key-a").unwrap(), vec![c.id]);
        assert!(list_cohorts_for_member(&conn, "hash-old").unwrap().is_empty());

        assert!(delete_membership_by_key(&conn, &c.id, "key-a").unwrap());
        assert_eq!(count_members(&conn, &c.id).unwrap(), 0);
    }

    #[test]
    fn cohort_patterns_filtered_by_families_affected() {
        let conn = test_db();
        let c = cohort("c", 5);
        insert_cohort_definition(&conn, &c).unwrap();
        let p = CohortPattern {
            id: Uuid::new_v4(),
            cohort_id: c.id,
            input_factor: "sleep_minutes".into(),
            output_factor: "mood_level".into(),
            families_affected: 4,
            families_total: 9,
            average_correlation: 0.5,
            std_dev: 0.1,
            ci_low: 0.4,
            ci_high: 0.6,
            description_simple: "s".into(),
            description_detailed: "d".into(),
            active: true,
            computed_at: ts("2026-03-02 00:00:00"),
        };
        insert_cohort_pattern(&conn, &p).unwrap();
        assert!(list_active_cohort_patterns(&conn, &c.id, 5).unwrap().is_empty());

        let mut grown = p.clone();
        grown.families_affected = 6;
        update_cohort_pattern_stats(&conn, &grown).unwrap();
        assert_eq!(list_active_cohort_patterns(&conn, &c.id, 5).unwrap(), vec![grown.clone()]);
        assert_eq!(
            find_active_cohort_pattern(&conn, &c.id, "sleep_minutes", "mood_level").unwrap(),
            Some(grown)
        );

        assert!(deactivate_cohort_pattern(&conn, &p.id).unwrap());
        assert!(!get_cohort_pattern(&conn, &p.id).unwrap().active);
    }
}
