use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{
    fmt_datetime, parse_datetime, parse_opt_datetime, parse_opt_uuid, parse_uuid, DatabaseError,
};
use crate::models::enums::RetirementReason;
use crate::models::FamilyPattern;

const PATTERN_COLUMNS: &str = "id, child_id, input_factor, output_factor, strength, confidence,
     sample_size, lag_hours, source_request_id, first_detected_at, last_confirmed_at,
     times_confirmed, active, deactivated_at, deactivation_reason";

struct PatternRow {
    id: String,
    child_id: String,
    input_factor: String,
    output_factor: String,
    strength: f64,
    confidence: f64,
    sample_size: u32,
    lag_hours: i64,
    source_request_id: Option<String>,
    first_detected_at: String,
    last_confirmed_at: String,
    times_confirmed: u32,
    active: i32,
    deactivated_at: Option<String>,
    deactivation_reason: Option<String>,
}

impl PatternRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            input_factor: row.get(2)?,
            output_factor: row.get(3)?,
            strength: row.get(4)?,
            confidence: row.get(5)?,
            sample_size: row.get(6)?,
            lag_hours: row.get(7)?,
            source_request_id: row.get(8)?,
            first_detected_at: row.get(9)?,
            last_confirmed_at: row.get(10)?,
            times_confirmed: row.get(11)?,
            active: row.get(12)?,
            deactivated_at: row.get(13)?,
            deactivation_reason: row.get(14)?,
        })
    }

    fn into_model(self) -> Result<FamilyPattern, DatabaseError> {
        Ok(FamilyPattern {
            id: parse_uuid(&self.id)?,
            child_id: parse_uuid(&self.child_id)?,
            input_factor: self.input_factor,
            output_factor: self.output_factor,
            strength: self.strength,
            confidence: self.confidence,
            sample_size: self.sample_size,
            lag_hours: self.lag_hours,
            source_request_id: parse_opt_uuid(self.source_request_id)?,
            first_detected_at: parse_datetime(&self.first_detected_at)?,
            last_confirmed_at: parse_datetime(&self.last_confirmed_at)?,
            times_confirmed: self.times_confirmed,
            active: self.active != 0,
            deactivated_at: parse_opt_datetime(self.deactivated_at)?,
            deactivation_reason: self
                .deactivation_reason
                .as_deref()
                .map(RetirementReason::from_str)
                .transpose()?,
        })
    }
}

fn collect_patterns(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<FamilyPattern>, DatabaseError> {
    let rows = stmt.query_map(params, PatternRow::from_row)?;
    let mut patterns = Vec::new();
    for row in rows {
        patterns.push(row?.into_model()?);
    }
    Ok(patterns)
}

/// The active pattern for a (child, input, output, lag bucket) key, if any.
pub fn find_active_pattern(
    conn: &Connection,
    child_id: &Uuid,
    input_factor: &str,
    output_factor: &str,
    lag_bucket: i64,
) -> Result<Option<FamilyPattern>, DatabaseError> {
    let sql = format!(
        "SELECT {PATTERN_COLUMNS} FROM family_patterns
         WHERE child_id = ?1 AND input_factor = ?2 AND output_factor = ?3
           AND lag_bucket = ?4 AND active = 1
         ORDER BY last_confirmed_at DESC LIMIT 1"
    );
    conn.query_row(
        &sql,
        params![child_id.to_string(), input_factor, output_factor, lag_bucket],
        PatternRow::from_row,
    )
    .optional()?
    .map(PatternRow::into_model)
    .transpose()
}

pub fn get_pattern(conn: &Connection, id: &Uuid) -> Result<FamilyPattern, DatabaseError> {
    let sql = format!("SELECT {PATTERN_COLUMNS} FROM family_patterns WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], PatternRow::from_row)
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "FamilyPattern".into(),
            id: id.to_string(),
        })?
        .into_model()
}

pub fn insert_pattern(conn: &Connection, pattern: &FamilyPattern) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO family_patterns
         (id, child_id, input_factor, output_factor, strength, confidence, sample_size,
          lag_hours, lag_bucket, source_request_id, first_detected_at, last_confirmed_at,
          times_confirmed, active, deactivated_at, deactivation_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, NULL)",
        params![
            pattern.id.to_string(),
            pattern.child_id.to_string(),
            pattern.input_factor,
            pattern.output_factor,
            pattern.strength,
            pattern.confidence,
            pattern.sample_size,
            pattern.lag_hours,
            pattern.lag_bucket(),
            pattern.source_request_id.map(|id| id.to_string()),
            fmt_datetime(&pattern.first_detected_at),
            fmt_datetime(&pattern.last_confirmed_at),
            pattern.times_confirmed,
            pattern.active as i32,
        ],
    )?;
    Ok(())
}

/// Persist the merged statistics of an active pattern.
pub fn update_merged_pattern(
    conn: &Connection,
    pattern: &FamilyPattern,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE family_patterns
         SET strength = ?1, confidence = ?2, sample_size = ?3, source_request_id = ?4,
             last_confirmed_at = ?5, times_confirmed = ?6
         WHERE id = ?7 AND active = 1",
        params![
            pattern.strength,
            pattern.confidence,
            pattern.sample_size,
            pattern.source_request_id.map(|id| id.to_string()),
            fmt_datetime(&pattern.last_confirmed_at),
            pattern.times_confirmed,
            pattern.id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "FamilyPattern".into(),
            id: pattern.id.to_string(),
        });
    }
    Ok(())
}

/// Retire a pattern. The row and its counters stay for audit.
pub fn deactivate_pattern(
    conn: &Connection,
    id: &Uuid,
    reason: RetirementReason,
    now: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE family_patterns
         SET active = 0, deactivated_at = ?1, deactivation_reason = ?2
         WHERE id = ?3 AND active = 1",
        params![fmt_datetime(&now), reason.as_str(), id.to_string()],
    )?;
    Ok(updated == 1)
}

/// Active patterns for a child, strongest first.
pub fn list_active_patterns(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<Vec<FamilyPattern>, DatabaseError> {
    let sql = format!(
        "SELECT {PATTERN_COLUMNS} FROM family_patterns
         WHERE child_id = ?1 AND active = 1
         ORDER BY ABS(strength) DESC, last_confirmed_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    collect_patterns(&mut stmt, params![child_id.to_string()])
}

/// Every pattern for a child, including retired ones.
pub fn list_pattern_history(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<Vec<FamilyPattern>, DatabaseError> {
    let sql = format!(
        "SELECT {PATTERN_COLUMNS} FROM family_patterns
         WHERE child_id = ?1
         ORDER BY first_detected_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    collect_patterns(&mut stmt, params![child_id.to_string()])
}
