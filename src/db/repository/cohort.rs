use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{fmt_datetime, parse_datetime, parse_uuid, DatabaseError};
use crate::models::{CohortCriteria, CohortDefinition, CohortPattern};

// ──────────────────────────────────────────────
// Cohort definitions
// ──────────────────────────────────────────────

fn definition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, u32, i32, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn definition_into_model(
    (id, name, criteria_json, min_members, active, created_at): (String, String, String, u32, i32, String),
) -> Result<CohortDefinition, DatabaseError> {
    let criteria: CohortCriteria = serde_json::from_str(&criteria_json)?;
    Ok(CohortDefinition {
        id: parse_uuid(&id)?,
        name,
        criteria,
        min_members,
        active: active != 0,
        created_at: parse_datetime(&created_at)?,
    })
}

pub fn insert_cohort_definition(
    conn: &Connection,
    cohort: &CohortDefinition,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO cohort_definitions (id, name, criteria_json, min_members, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            cohort.id.to_string(),
            cohort.name,
            serde_json::to_string(&cohort.criteria)?,
            cohort.min_members,
            cohort.active as i32,
            fmt_datetime(&cohort.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_cohort_definition(
    conn: &Connection,
    id: &Uuid,
) -> Result<CohortDefinition, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, criteria_json, min_members, active, created_at
             FROM cohort_definitions WHERE id = ?1",
            params![id.to_string()],
            definition_from_row,
        )
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "CohortDefinition".into(),
            id: id.to_string(),
        })?;
    definition_into_model(row)
}

pub fn list_active_cohort_definitions(
    conn: &Connection,
) -> Result<Vec<CohortDefinition>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, criteria_json, min_members, active, created_at
         FROM cohort_definitions WHERE active = 1 ORDER BY name",
    )?;
    let rows = stmt.query_map([], definition_from_row)?;

    let mut cohorts = Vec::new();
    for row in rows {
        cohorts.push(definition_into_model(row?)?);
    }
    Ok(cohorts)
}

pub fn set_cohort_active(conn: &Connection, id: &Uuid, active: bool) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE cohort_definitions SET active = ?1 WHERE id = ?2",
        params![active as i32, id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "CohortDefinition".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Memberships (anonymous hash only)
// ──────────────────────────────────────────────

/// Insert or refresh a membership, keyed by the member's stable key.
///
/// A child whose signature changed keeps one row; its hash is replaced.
pub fn upsert_membership(
    conn: &Connection,
    cohort_id: &Uuid,
    member_key: &str,
    member_hash: &str,
    match_score: f64,
    now: NaiveDateTime,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO cohort_memberships (cohort_id, member_key, member_hash, match_score, joined_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(cohort_id, member_key)
         DO UPDATE SET member_hash = ?3, match_score = ?4, updated_at = ?5",
        params![
            cohort_id.to_string(),
            member_key,
            member_hash,
            match_score,
            fmt_datetime(&now)
        ],
    )?;
    Ok(())
}

/// Remove a membership. Returns false if it was not there.
pub fn delete_membership(
    conn: &Connection,
    cohort_id: &Uuid,
    member_hash: &str,
) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM cohort_memberships WHERE cohort_id = ?1 AND member_hash = ?2",
        params![cohort_id.to_string(), member_hash],
    )?;
    Ok(deleted == 1)
}

/// Remove the membership held under a stable key.
pub fn delete_membership_by_key(
    conn: &Connection,
    cohort_id: &Uuid,
    member_key: &str,
) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM cohort_memberships WHERE cohort_id = ?1 AND member_key = ?2",
        params![cohort_id.to_string(), member_key],
    )?;
    Ok(deleted == 1)
}

pub fn count_members(conn: &Connection, cohort_id: &Uuid) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM cohort_memberships WHERE cohort_id = ?1",
        params![cohort_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_member_hashes(conn: &Connection, cohort_id: &Uuid) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT member_hash FROM cohort_memberships WHERE cohort_id = ?1 ORDER BY member_hash",
    )?;
    let hashes = stmt
        .query_map(params![cohort_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hashes)
}

/// Active cohorts holding a membership under this stable key.
pub fn list_cohorts_for_key(
    conn: &Connection,
    member_key: &str,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT m.cohort_id FROM cohort_memberships m
         JOIN cohort_definitions c ON c.id = m.cohort_id
         WHERE m.member_key = ?1 AND c.active = 1",
    )?;
    let rows = stmt.query_map(params![member_key], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row?)?);
    }
    Ok(ids)
}

/// Cohorts a hashed member belongs to.
pub fn list_cohorts_for_member(
    conn: &Connection,
    member_hash: &str,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT m.cohort_id FROM cohort_memberships m
         JOIN cohort_definitions c ON c.id = m.cohort_id
         WHERE m.member_hash = ?1 AND c.active = 1",
    )?;
    let rows = stmt.query_map(params![member_hash], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row?)?);
    }
    Ok(ids)
}

// ──────────────────────────────────────────────
// Cohort patterns
// ──────────────────────────────────────────────

const COHORT_PATTERN_COLUMNS: &str = "id, cohort_id, input_factor, output_factor,
     families_affected, families_total, average_correlation, std_dev, ci_low, ci_high,
     description_simple, description_detailed, active, computed_at";

struct CohortPatternRow {
    id: String,
    cohort_id: String,
    input_factor: String,
    output_factor: String,
    families_affected: u32,
    families_total: u32,
    average_correlation: f64,
    std_dev: f64,
    ci_low: f64,
    ci_high: f64,
    description_simple: String,
    description_detailed: String,
    active: i32,
    computed_at: String,
}

impl CohortPatternRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            cohort_id: row.get(1)?,
            input_factor: row.get(2)?,
            output_factor: row.get(3)?,
            families_affected: row.get(4)?,
            families_total: row.get(5)?,
            average_correlation: row.get(6)?,
            std_dev: row.get(7)?,
            ci_low: row.get(8)?,
            ci_high: row.get(9)?,
            description_simple: row.get(10)?,
            description_detailed: row.get(11)?,
            active: row.get(12)?,
            computed_at: row.get(13)?,
        })
    }

    fn into_model(self) -> Result<CohortPattern, DatabaseError> {
        Ok(CohortPattern {
            id: parse_uuid(&self.id)?,
            cohort_id: parse_uuid(&self.cohort_id)?,
            input_factor: self.input_factor,
            output_factor: self.output_factor,
            families_affected: self.families_affected,
            families_total: self.families_total,
            average_correlation: self.average_correlation,
            std_dev: self.std_dev,
            ci_low: self.ci_low,
            ci_high: self.ci_high,
            description_simple: self.description_simple,
            description_detailed: self.description_detailed,
            active: self.active != 0,
            computed_at: parse_datetime(&self.computed_at)?,
        })
    }
}

pub fn find_active_cohort_pattern(
    conn: &Connection,
    cohort_id: &Uuid,
    input_factor: &str,
    output_factor: &str,
) -> Result<Option<CohortPattern>, DatabaseError> {
    let sql = format!(
        "SELECT {COHORT_PATTERN_COLUMNS} FROM cohort_patterns
         WHERE cohort_id = ?1 AND input_factor = ?2 AND output_factor = ?3 AND active = 1
         LIMIT 1"
    );
    conn.query_row(
        &sql,
        params![cohort_id.to_string(), input_factor, output_factor],
        CohortPatternRow::from_row,
    )
    .optional()?
    .map(CohortPatternRow::into_model)
    .transpose()
}

pub fn get_cohort_pattern(conn: &Connection, id: &Uuid) -> Result<CohortPattern, DatabaseError> {
    let sql = format!("SELECT {COHORT_PATTERN_COLUMNS} FROM cohort_patterns WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], CohortPatternRow::from_row)
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "CohortPattern".into(),
            id: id.to_string(),
        })?
        .into_model()
}

pub fn insert_cohort_pattern(conn: &Connection, p: &CohortPattern) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO cohort_patterns
         (id, cohort_id, input_factor, output_factor, families_affected, families_total,
          average_correlation, std_dev, ci_low, ci_high, description_simple,
          description_detailed, active, computed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            p.id.to_string(),
            p.cohort_id.to_string(),
            p.input_factor,
            p.output_factor,
            p.families_affected,
            p.families_total,
            p.average_correlation,
            p.std_dev,
            p.ci_low,
            p.ci_high,
            p.description_simple,
            p.description_detailed,
            p.active as i32,
            fmt_datetime(&p.computed_at),
        ],
    )?;
    Ok(())
}

pub fn update_cohort_pattern_stats(conn: &Connection, p: &CohortPattern) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE cohort_patterns
         SET families_affected = ?1, families_total = ?2, average_correlation = ?3,
             std_dev = ?4, ci_low = ?5, ci_high = ?6, description_simple = ?7,
             description_detailed = ?8, computed_at = ?9
         WHERE id = ?10",
        params![
            p.families_affected,
            p.families_total,
            p.average_correlation,
            p.std_dev,
            p.ci_low,
            p.ci_high,
            p.description_simple,
            p.description_detailed,
            fmt_datetime(&p.computed_at),
            p.id.to_string(),
        ],
    )?;
    Ok(())
}

pub fn deactivate_cohort_pattern(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE cohort_patterns SET active = 0 WHERE id = ?1 AND active = 1",
        params![id.to_string()],
    )?;
    Ok(updated == 1)
}

/// Active cohort patterns with at least `min_affected` families behind them.
pub fn list_active_cohort_patterns(
    conn: &Connection,
    cohort_id: &Uuid,
    min_affected: u32,
) -> Result<Vec<CohortPattern>, DatabaseError> {
    let sql = format!(
        "SELECT {COHORT_PATTERN_COLUMNS} FROM cohort_patterns
         WHERE cohort_id = ?1 AND active = 1 AND families_affected >= ?2
         ORDER BY ABS(average_correlation) DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![cohort_id.to_string(), min_affected], CohortPatternRow::from_row)?;

    let mut patterns = Vec::new();
    for row in rows {
        patterns.push(row?.into_model()?);
    }
    Ok(patterns)
}
