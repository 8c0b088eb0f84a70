//! Cohort anonymizer.
//!
//! Children join cohorts only under a keyed hash of their clinical signature.
//! Cohort statistics are aggregated from anonymous contributions and withheld
//! whenever fewer families than the cohort's floor stand behind them.

use std::collections::{BTreeMap, HashMap, HashSet};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::NaiveDateTime;
use hkdf::Hkdf;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::db::{repository, DatabaseError};
use crate::models::{
    AgeBand, ChildProfile, CohortCriteria, CohortDefinition, CohortMatch, CohortPattern,
    PatternContribution, PatternLink,
};

use super::insights::{describe_cohort_pattern, refresh_cohort_insight};
use super::stats;
use super::AnalysisError;

// ═══════════════════════════════════════════════════════════
// Member hash
// ═══════════════════════════════════════════════════════════

/// Keyed hasher for cohort member identities.
#[derive(Clone)]
pub struct CohortHasher {
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for CohortHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortHasher").field("key", &"[REDACTED]").finish()
    }
}

fn normalized_set(values: &[String]) -> Vec<String> {
    let mut set: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    set.sort();
    set.dedup();
    set
}

impl CohortHasher {
    pub fn new(key: Zeroizing<Vec<u8>>) -> Self {
        Self { key }
    }

    /// Canonical signature: child key, sorted lowercase diagnoses, age band,
    /// sorted lowercase medication classes.
    fn signature(profile: &ChildProfile) -> String {
        format!(
            "{}|{}|{}|{}",
            profile.child_key,
            normalized_set(&profile.diagnoses).join(","),
            AgeBand::of(profile.age_years).as_str(),
            normalized_set(&profile.medication_classes).join(","),
        )
    }

    /// HKDF-Extract is HMAC(salt, ikm), so the key goes in as the salt.
    fn keyed(&self, message: &str) -> String {
        let (prk, _) = Hkdf::<Sha256>::extract(Some(self.key.as_slice()), message.as_bytes());
        URL_SAFE_NO_PAD.encode(prk)
    }

    /// HMAC-SHA256 of the signature under the process key, base64url.
    pub fn compute_child_hash(&self, profile: &ChildProfile) -> String {
        self.keyed(&Self::signature(profile))
    }

    /// Stable membership key: depends on the child key alone, so it survives
    /// age band, diagnosis and medication changes.
    pub fn member_key(&self, child_key: &Uuid) -> String {
        self.keyed(&format!("member|{child_key}"))
    }
}

// ═══════════════════════════════════════════════════════════
// Matching and membership
// ═══════════════════════════════════════════════════════════

fn overlap_fraction(wanted: &[String], have: &[String]) -> Option<f64> {
    let wanted = normalized_set(wanted);
    if wanted.is_empty() {
        return None;
    }
    let have: HashSet<String> = normalized_set(have).into_iter().collect();
    let hits = wanted.iter().filter(|w| have.contains(*w)).count();
    Some(hits as f64 / wanted.len() as f64)
}

/// How well a profile fits cohort criteria, in (0, 1], or None if it does not.
///
/// Age bounds are hard limits. Diagnosis and medication sets need at least one
/// overlap each; the score averages the overlap fractions of the sets given.
pub fn match_score(criteria: &CohortCriteria, profile: &ChildProfile) -> Option<f64> {
    if criteria.min_age_years.is_some_and(|min| profile.age_years < min) {
        return None;
    }
    if criteria.max_age_years.is_some_and(|max| profile.age_years > max) {
        return None;
    }

    let parts: Vec<f64> = [
        overlap_fraction(&criteria.diagnoses, &profile.diagnoses),
        overlap_fraction(&criteria.medication_classes, &profile.medication_classes),
    ]
    .into_iter()
    .flatten()
    .collect();

    if parts.iter().any(|p| *p == 0.0) {
        return None;
    }
    Some(stats::mean(&parts).unwrap_or(1.0))
}

/// Active cohorts the profile qualifies for.
pub fn match_cohorts(
    conn: &Connection,
    profile: &ChildProfile,
) -> Result<Vec<CohortMatch>, AnalysisError> {
    let matches = repository::list_active_cohort_definitions(conn)?
        .into_iter()
        .filter_map(|cohort| {
            match_score(&cohort.criteria, profile).map(|match_score| CohortMatch {
                cohort,
                match_score,
            })
        })
        .collect();
    Ok(matches)
}

pub fn create_cohort(
    conn: &Connection,
    name: &str,
    criteria: CohortCriteria,
    min_members: Option<u32>,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<CohortDefinition, AnalysisError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AnalysisError::InvalidInput("cohort name is empty".into()));
    }
    let min_members = min_members.unwrap_or(config.default_cohort_min_members);
    if min_members == 0 {
        return Err(AnalysisError::InvalidInput("cohort floor must be positive".into()));
    }
    if let (Some(min), Some(max)) = (criteria.min_age_years, criteria.max_age_years) {
        if min > max {
            return Err(AnalysisError::InvalidInput(format!(
                "age bounds reversed: {min} > {max}"
            )));
        }
    }

    let cohort = CohortDefinition {
        id: Uuid::new_v4(),
        name: name.to_string(),
        criteria,
        min_members,
        active: true,
        created_at: now,
    };
    repository::insert_cohort_definition(conn, &cohort)?;
    tracing::info!(cohort_id = %cohort.id, min_members, "Cohort created");
    Ok(cohort)
}

/// Add (or refresh) a member known only by its hash, which also serves as
/// its membership key. Repeating the call is harmless.
pub fn add_member(
    conn: &Connection,
    cohort_id: &Uuid,
    member_hash: &str,
    match_score: f64,
    now: NaiveDateTime,
) -> Result<(), AnalysisError> {
    repository::get_cohort_definition(conn, cohort_id).map_err(AnalysisError::from_store)?;
    repository::upsert_membership(
        conn,
        cohort_id,
        member_hash,
        member_hash,
        match_score.clamp(0.0, 1.0),
        now,
    )?;
    Ok(())
}

/// Remove a member. Returns false if it was not a member.
pub fn remove_member(
    conn: &Connection,
    cohort_id: &Uuid,
    member_hash: &str,
) -> Result<bool, AnalysisError> {
    Ok(repository::delete_membership(conn, cohort_id, member_hash)?)
}

/// Bring a child's memberships in line with the active cohorts.
///
/// Joins every matching cohort and leaves every active cohort that no longer
/// matches. Rows are keyed by the child's stable member key, so a changed
/// signature replaces the stored hash instead of adding a second member.
/// Returns the matches.
pub fn sync_memberships(
    conn: &Connection,
    hasher: &CohortHasher,
    profile: &ChildProfile,
    now: NaiveDateTime,
) -> Result<Vec<CohortMatch>, AnalysisError> {
    let member_key = hasher.member_key(&profile.child_key);
    let member_hash = hasher.compute_child_hash(profile);
    let matches = match_cohorts(conn, profile)?;
    let matched: HashSet<Uuid> = matches.iter().map(|m| m.cohort.id).collect();

    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
    for m in &matches {
        repository::upsert_membership(&tx, &m.cohort.id, &member_key, &member_hash, m.match_score, now)?;
    }
    let mut left = 0usize;
    for cohort_id in repository::list_cohorts_for_key(&tx, &member_key)? {
        if !matched.contains(&cohort_id)
            && repository::delete_membership_by_key(&tx, &cohort_id, &member_key)?
        {
            left += 1;
        }
    }
    tx.commit().map_err(DatabaseError::from)?;

    tracing::debug!(joined = matches.len(), left, "Cohort memberships synced");
    Ok(matches)
}

// ═══════════════════════════════════════════════════════════
// Aggregation
// ═══════════════════════════════════════════════════════════

/// A child's active family patterns, as anonymous contributions.
pub fn contributions_for(
    conn: &Connection,
    hasher: &CohortHasher,
    child_id: &Uuid,
    profile: &ChildProfile,
) -> Result<Vec<PatternContribution>, AnalysisError> {
    let member_hash = hasher.compute_child_hash(profile);
    let contributions = repository::list_active_patterns(conn, child_id)?
        .into_iter()
        .map(|p| PatternContribution {
            member_hash: member_hash.clone(),
            input_factor: p.input_factor,
            output_factor: p.output_factor,
            strength: p.strength,
        })
        .collect();
    Ok(contributions)
}

struct PairStats {
    affected: u32,
    mean: f64,
    std_dev: f64,
    ci: (f64, f64),
}

/// One value per member (the mean of that member's strengths), then
/// mean, sample standard deviation and 95% interval across members.
fn pair_stats(per_member: &HashMap<&str, Vec<f64>>) -> Option<PairStats> {
    let values: Vec<f64> = per_member
        .values()
        .filter_map(|strengths| stats::mean(strengths))
        .collect();
    let mean = stats::mean(&values)?;
    let std_dev = stats::sample_std_dev(&values).unwrap_or(0.0);
    Some(PairStats {
        affected: values.len() as u32,
        mean,
        std_dev,
        ci: stats::mean_ci95(mean, std_dev, values.len()),
    })
}

fn retire_cohort_pattern(
    conn: &Connection,
    pattern: &CohortPattern,
    now: NaiveDateTime,
) -> Result<(), AnalysisError> {
    if repository::deactivate_cohort_pattern(conn, &pattern.id)? {
        repository::deactivate_insights_for_link(conn, &PatternLink::Cohort(pattern.id), now)?;
        tracing::debug!(cohort_pattern_id = %pattern.id, "Cohort pattern withdrawn");
    }
    Ok(())
}

/// Recompute a cohort's patterns from anonymous contributions.
///
/// Contributions from hashes that are not members are ignored. A factor pair
/// backed by fewer families than the floor is withdrawn along with its
/// insight, as is any previously active pair with no contributions left.
/// Returns the active patterns after recomputation.
pub fn aggregate_cohort_patterns(
    conn: &Connection,
    cohort_id: &Uuid,
    contributions: &[PatternContribution],
    now: NaiveDateTime,
) -> Result<Vec<CohortPattern>, AnalysisError> {
    let cohort = repository::get_cohort_definition(conn, cohort_id).map_err(AnalysisError::from_store)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(DatabaseError::from)?;

    let members: HashSet<String> = repository::list_member_hashes(&tx, cohort_id)?
        .into_iter()
        .collect();
    let families_total = members.len() as u32;

    let mut grouped: BTreeMap<(&str, &str), HashMap<&str, Vec<f64>>> = BTreeMap::new();
    for c in contributions {
        if !members.contains(&c.member_hash) || !c.strength.is_finite() {
            continue;
        }
        grouped
            .entry((c.input_factor.as_str(), c.output_factor.as_str()))
            .or_default()
            .entry(c.member_hash.as_str())
            .or_default()
            .push(c.strength);
    }

    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut active = Vec::new();

    for ((input, output), per_member) in &grouped {
        let existing = repository::find_active_cohort_pattern(&tx, cohort_id, input, output)?;
        let Some(s) = pair_stats(per_member) else {
            continue;
        };

        if s.affected < cohort.min_members {
            if let Some(p) = existing {
                retire_cohort_pattern(&tx, &p, now)?;
            }
            continue;
        }

        let (simple, detailed) =
            describe_cohort_pattern(input, output, s.affected, families_total, s.mean, s.ci);
        let pattern = CohortPattern {
            id: existing.as_ref().map(|p| p.id).unwrap_or_else(Uuid::new_v4),
            cohort_id: *cohort_id,
            input_factor: input.to_string(),
            output_factor: output.to_string(),
            families_affected: s.affected,
            families_total,
            average_correlation: s.mean,
            std_dev: s.std_dev,
            ci_low: s.ci.0,
            ci_high: s.ci.1,
            description_simple: simple,
            description_detailed: detailed,
            active: true,
            computed_at: now,
        };
        if existing.is_some() {
            repository::update_cohort_pattern_stats(&tx, &pattern)?;
        } else {
            repository::insert_cohort_pattern(&tx, &pattern)?;
        }
        refresh_cohort_insight(&tx, &cohort, &pattern, now)?;
        seen.insert(pattern.id);
        active.push(pattern);
    }

    for stale in repository::list_active_cohort_patterns(&tx, cohort_id, 0)? {
        if !seen.contains(&stale.id) {
            retire_cohort_pattern(&tx, &stale, now)?;
        }
    }

    tx.commit().map_err(DatabaseError::from)?;

    tracing::info!(
        cohort_id = %cohort_id,
        families_total,
        patterns = active.len(),
        "Cohort patterns aggregated"
    );
    Ok(active)
}

/// Fail with `CohortPrivacyFloor` when a cohort has too few members to report on.
pub fn check_privacy_floor(
    conn: &Connection,
    cohort: &CohortDefinition,
) -> Result<u32, AnalysisError> {
    let members = repository::count_members(conn, &cohort.id)?;
    if members < cohort.min_members {
        return Err(AnalysisError::CohortPrivacyFloor {
            cohort_id: cohort.id.to_string(),
            members,
            floor: cohort.min_members,
        });
    }
    Ok(members)
}

/// Active cohort patterns that may be shown.
///
/// Empty while the cohort is below its floor. Never includes a pattern with
/// fewer families affected than the floor.
pub fn get_active_cohort_patterns(
    conn: &Connection,
    cohort_id: &Uuid,
) -> Result<Vec<CohortPattern>, AnalysisError> {
    let cohort = repository::get_cohort_definition(conn, cohort_id).map_err(AnalysisError::from_store)?;
    match check_privacy_floor(conn, &cohort) {
        Ok(_) => Ok(repository::list_active_cohort_patterns(conn, cohort_id, cohort.min_members)?),
        Err(AnalysisError::CohortPrivacyFloor { members, floor, .. }) => {
            tracing::debug!(cohort_id = %cohort_id, members, floor, "Cohort below privacy floor");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 4, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn hasher() -> CohortHasher {
        CohortHasher::new(Zeroizing::new(vec![7u8; 32]))
    }

    fn profile(age: u32, diagnoses: &[&str]) -> ChildProfile {
        ChildProfile {
            child_key: Uuid::new_v4(),
            diagnoses: diagnoses.iter().map(|d| d.to_string()).collect(),
            medication_classes: vec!["ssri".into()],
            age_years: age,
        }
    }

    fn autism_6_to_9(conn: &Connection, floor: u32) -> CohortDefinition {
        create_cohort(
            conn,
            "autism 6-9",
            CohortCriteria {
                diagnoses: vec!["autism".into()],
                medication_classes: vec![],
                min_age_years: Some(6),
                max_age_years: Some(9),
            },
            Some(floor),
            at(1),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn contribution(hash: &str, strength: f64) -> PatternContribution {
        PatternContribution {
            member_hash: hash.into(),
            input_factor: "sleep_minutes".into(),
            output_factor: "mood_level".into(),
            strength,
        }
    }

    // ═══════════════════════════════════════════
    // Hashing
    // ═══════════════════════════════════════════

    #[test]
    fn hash_ignores_order_and_case() {
        let h = hasher();
        let a = profile(7, &["Autism", "ADHD"]);
        let mut b = a.clone();
        b.diagnoses = vec!["adhd ".into(), "autism".into()];
        assert_eq!(h.compute_child_hash(&a), h.compute_child_hash(&b));
    }

    #[test]
    fn hash_separates_children_and_keys() {
        let h = hasher();
        let a = profile(7, &["autism"]);
        let mut twin = a.clone();
        twin.child_key = Uuid::new_v4();
        assert_ne!(h.compute_child_hash(&a), h.compute_child_hash(&twin));

        let other = CohortHasher::new(Zeroizing::new(vec![8u8; 32]));
        assert_ne!(h.compute_child_hash(&a), other.compute_child_hash(&a));
    }

    #[test]
    fn hash_changes_only_across_age_bands() {
        let h = hasher();
        let mut a = profile(6, &["autism"]);
        let six = h.compute_child_hash(&a);
        a.age_years = 9;
        assert_eq!(h.compute_child_hash(&a), six);
        a.age_years = 10;
        assert_ne!(h.compute_child_hash(&a), six);
    }

    #[test]
    fn hash_is_url_safe_and_hides_profile() {
        let h = hasher();
        let p = profile(7, &["autism"]);
        let hash = h.compute_child_hash(&p);
        assert_eq!(hash.len(), 43);
        assert!(!hash.contains('+') && !hash.contains('/') && !hash.contains('='));
        assert!(!hash.contains("autism"));
        assert!(format!("{h:?}").contains("REDACTED"));
    }

    // ═══════════════════════════════════════════
    // Matching
    // ═══════════════════════════════════════════

    #[test]
    fn age_bounds_are_hard_limits() {
        let criteria = CohortCriteria {
            diagnoses: vec!["autism".into()],
            min_age_years: Some(6),
            max_age_years: Some(9),
            ..Default::default()
        };
        assert_eq!(match_score(&criteria, &profile(7, &["autism"])), Some(1.0));
        assert_eq!(match_score(&criteria, &profile(10, &["autism"])), None);
        assert_eq!(match_score(&criteria, &profile(7, &["epilepsy"])), None);
    }

    #[test]
    fn partial_overlap_lowers_score() {
        let criteria = CohortCriteria {
            diagnoses: vec!["autism".into(), "epilepsy".into()],
            ..Default::default()
        };
        let score = match_score(&criteria, &profile(7, &["autism"])).unwrap();
        assert!((score - 0.5).abs() < 1e-12);
        assert_eq!(match_score(&CohortCriteria::default(), &profile(3, &[])), Some(1.0));
    }

    #[test]
    fn sync_joins_and_leaves() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 5);
        let h = hasher();
        let mut p = profile(8, &["autism"]);

        let matches = sync_memberships(&conn, &h, &p, at(2)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(repository::count_members(&conn, &cohort.id).unwrap(), 1);

        // Same child twice stays one member.
        sync_memberships(&conn, &h, &p, at(3)).unwrap();
        assert_eq!(repository::count_members(&conn, &cohort.id).unwrap(), 1);

        // Aging out of the 6-9 band leaves the cohort.
        p.age_years = 12;
        assert!(sync_memberships(&conn, &h, &p, at(4)).unwrap().is_empty());
        assert_eq!(repository::count_members(&conn, &cohort.id).unwrap(), 0);
    }

    #[test]
    fn changed_signature_stays_one_member() {
        let conn = open_memory_database().unwrap();
        let cohort = create_cohort(
            &conn,
            "autism",
            CohortCriteria {
                diagnoses: vec!["autism".into()],
                ..Default::default()
            },
            Some(2),
            at(1),
            &EngineConfig::default(),
        )
        .unwrap();
        let h = hasher();
        let mut p = profile(9, &["autism"]);

        sync_memberships(&conn, &h, &p, at(2)).unwrap();
        let before = h.compute_child_hash(&p);
        p.age_years = 10;
        p.medication_classes.push("stimulant".into());
        sync_memberships(&conn, &h, &p, at(3)).unwrap();

        assert_ne!(h.compute_child_hash(&p), before);
        assert_eq!(repository::count_members(&conn, &cohort.id).unwrap(), 1);
        assert_eq!(
            repository::list_member_hashes(&conn, &cohort.id).unwrap(),
            vec![h.compute_child_hash(&p)]
        );
        assert!(matches!(
            check_privacy_floor(&conn, &cohort),
            Err(AnalysisError::CohortPrivacyFloor { members: 1, floor: 2, .. })
        ));
    }

    #[test]
    fn member_key_ignores_signature() {
        let h = hasher();
        let a = profile(6, &["autism"]);
        let key = h.member_key(&a.child_key);
        assert_eq!(key.len(), 43);
        assert_ne!(key, h.compute_child_hash(&a));
        assert_ne!(key, h.member_key(&Uuid::new_v4()));
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 5);
        add_member(&conn, &cohort.id, "m1", 1.0, at(2)).unwrap();
        add_member(&conn, &cohort.id, "m1", 0.8, at(3)).unwrap();
        assert_eq!(repository::count_members(&conn, &cohort.id).unwrap(), 1);
        assert!(remove_member(&conn, &cohort.id, "m1").unwrap());
        assert!(!remove_member(&conn, &cohort.id, "m1").unwrap());
    }

    #[test]
    fn add_member_to_missing_cohort_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = add_member(&conn, &Uuid::new_v4(), "m1", 1.0, at(2)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    // ═══════════════════════════════════════════
    // Aggregation and the privacy floor
    // ═══════════════════════════════════════════

    #[test]
    fn four_members_below_floor_of_five_shows_nothing() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 5);
        let hashes = ["a", "b", "c", "d"];
        for h in hashes {
            add_member(&conn, &cohort.id, h, 1.0, at(2)).unwrap();
        }
        let contributions: Vec<_> = hashes.iter().map(|h| contribution(h, 0.5)).collect();

        let created = aggregate_cohort_patterns(&conn, &cohort.id, &contributions, at(3)).unwrap();
        assert!(created.is_empty());
        assert!(get_active_cohort_patterns(&conn, &cohort.id).unwrap().is_empty());
        assert!(repository::list_cohort_insights(&conn, &cohort.id).unwrap().is_empty());
    }

    #[test]
    fn floor_reached_creates_pattern_and_cohort_insight() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 5);
        let hashes = ["a", "b", "c", "d", "e", "f"];
        for h in hashes {
            add_member(&conn, &cohort.id, h, 1.0, at(2)).unwrap();
        }
        let strengths = [0.4, 0.5, 0.6, 0.5, 0.5];
        let mut contributions: Vec<_> = hashes
            .iter()
            .zip(strengths)
            .map(|(h, s)| contribution(h, s))
            .collect();
        // Outsider is ignored.
        contributions.push(contribution("stranger", -0.9));

        let active = aggregate_cohort_patterns(&conn, &cohort.id, &contributions, at(3)).unwrap();
        assert_eq!(active.len(), 1);
        let p = &active[0];
        assert_eq!(p.families_affected, 5);
        assert_eq!(p.families_total, 6);
        assert!((p.average_correlation - 0.5).abs() < 1e-12);
        assert!(p.ci_low < 0.5 && p.ci_high > 0.5);

        assert_eq!(get_active_cohort_patterns(&conn, &cohort.id).unwrap(), active);
        let insights = repository::list_cohort_insights(&conn, &cohort.id).unwrap();
        assert_eq!(insights.len(), 1);
        assert!(insights[0].scope.child_id().is_none());
    }

    #[test]
    fn one_value_per_member() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 2);
        for h in ["a", "b"] {
            add_member(&conn, &cohort.id, h, 1.0, at(2)).unwrap();
        }
        let contributions = vec![
            contribution("a", 0.2),
            contribution("a", 0.4),
            contribution("b", 0.6),
        ];
        let active = aggregate_cohort_patterns(&conn, &cohort.id, &contributions, at(3)).unwrap();
        assert_eq!(active[0].families_affected, 2);
        assert!((active[0].average_correlation - 0.45).abs() < 1e-12);
    }

    #[test]
    fn dropping_below_floor_withdraws_pattern() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 2);
        for h in ["a", "b", "c"] {
            add_member(&conn, &cohort.id, h, 1.0, at(2)).unwrap();
        }
        let first = aggregate_cohort_patterns(
            &conn,
            &cohort.id,
            &[contribution("a", 0.5), contribution("b", 0.6)],
            at(3),
        )
        .unwrap();
        assert_eq!(first.len(), 1);

        // Recompute keeps the id.
        let again = aggregate_cohort_patterns(
            &conn,
            &cohort.id,
            &[contribution("a", 0.5), contribution("b", 0.6), contribution("c", 0.7)],
            at(4),
        )
        .unwrap();
        assert_eq!(again[0].id, first[0].id);
        assert_eq!(again[0].families_affected, 3);

        let after = aggregate_cohort_patterns(&conn, &cohort.id, &[contribution("a", 0.5)], at(5)).unwrap();
        assert!(after.is_empty());
        assert!(get_active_cohort_patterns(&conn, &cohort.id).unwrap().is_empty());
        assert_eq!(
            repository::count_active_insights_for_link(&conn, &PatternLink::Cohort(first[0].id)).unwrap(),
            0
        );
    }

    fn family_pattern(child_id: Uuid, strength: f64) -> crate::models::FamilyPattern {
        crate::models::FamilyPattern {
            id: Uuid::new_v4(),
            child_id,
            input_factor: "sleep_minutes".into(),
            output_factor: "mood_level".into(),
            strength,
            confidence: 0.6,
            sample_size: 20,
            lag_hours: 24,
            source_request_id: None,
            first_detected_at: at(2),
            last_confirmed_at: at(2),
            times_confirmed: 1,
            active: true,
            deactivated_at: None,
            deactivation_reason: None,
        }
    }

    #[test]
    fn family_patterns_flow_into_cohort_aggregate() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 2);
        let h = hasher();

        let mut contributions = Vec::new();
        for strength in [0.4, 0.6] {
            let child_id = Uuid::new_v4();
            let p = profile(7, &["autism"]);
            sync_memberships(&conn, &h, &p, at(2)).unwrap();
            repository::insert_pattern(&conn, &family_pattern(child_id, strength)).unwrap();

            let mine = contributions_for(&conn, &h, &child_id, &p).unwrap();
            assert_eq!(mine.len(), 1);
            assert_eq!(mine[0].member_hash, h.compute_child_hash(&p));
            contributions.extend(mine);
        }

        let members = repository::list_member_hashes(&conn, &cohort.id).unwrap();
        for c in &contributions {
            assert!(members.contains(&c.member_hash));
        }

        let active = aggregate_cohort_patterns(&conn, &cohort.id, &contributions, at(3)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].families_affected, 2);
        assert_eq!(active[0].families_total, 2);
        assert!((active[0].average_correlation - 0.5).abs() < 1e-12);
    }

    #[test]
    fn contributions_skip_retired_patterns() {
        let conn = open_memory_database().unwrap();
        let h = hasher();
        let child_id = Uuid::new_v4();
        let p = profile(7, &["autism"]);
        let pattern = family_pattern(child_id, 0.5);
        repository::insert_pattern(&conn, &pattern).unwrap();
        repository::deactivate_pattern(
            &conn,
            &pattern.id,
            crate::models::enums::RetirementReason::Contradicted,
            at(3),
        )
        .unwrap();

        assert!(contributions_for(&conn, &h, &child_id, &p).unwrap().is_empty());
    }

    #[test]
    fn floor_check_reports_counts() {
        let conn = open_memory_database().unwrap();
        let cohort = autism_6_to_9(&conn, 5);
        add_member(&conn, &cohort.id, "a", 1.0, at(2)).unwrap();
        let err = check_privacy_floor(&conn, &cohort).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::CohortPrivacyFloor { members: 1, floor: 5, .. }
        ));
    }
}
