use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{
    fmt_date, fmt_datetime, parse_date, parse_datetime, parse_opt_datetime, parse_opt_uuid,
    parse_uuid, DatabaseError,
};
use crate::models::enums::{InsightCategory, InsightTier, PatternLinkKind};
use crate::models::{DateRange, Insight, InsightDetail, InsightScope, PatternLink};

const INSIGHT_COLUMNS: &str = "id, tier, child_id, cohort_id, families_affected, families_total,
     category, summary_simple, summary_detailed, detail_json, confidence, sample_size,
     strength, significance, date_from, date_to, link_kind, link_id, clinically_validated,
     validation_count, active, surfaced_at, created_at, updated_at";

struct InsightRow {
    id: String,
    tier: String,
    child_id: Option<String>,
    cohort_id: Option<String>,
    families_affected: Option<u32>,
    families_total: Option<u32>,
    category: String,
    summary_simple: String,
    summary_detailed: String,
    detail_json: String,
    confidence: f64,
    sample_size: u32,
    strength: Option<f64>,
    significance: Option<f64>,
    date_from: Option<String>,
    date_to: Option<String>,
    link_kind: Option<String>,
    link_id: Option<String>,
    clinically_validated: i32,
    validation_count: u32,
    active: i32,
    surfaced_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl InsightRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tier: row.get(1)?,
            child_id: row.get(2)?,
            cohort_id: row.get(3)?,
            families_affected: row.get(4)?,
            families_total: row.get(5)?,
            category: row.get(6)?,
            summary_simple: row.get(7)?,
            summary_detailed: row.get(8)?,
            detail_json: row.get(9)?,
            confidence: row.get(10)?,
            sample_size: row.get(11)?,
            strength: row.get(12)?,
            significance: row.get(13)?,
            date_from: row.get(14)?,
            date_to: row.get(15)?,
            link_kind: row.get(16)?,
            link_id: row.get(17)?,
            clinically_validated: row.get(18)?,
            validation_count: row.get(19)?,
            active: row.get(20)?,
            surfaced_at: row.get(21)?,
            created_at: row.get(22)?,
            updated_at: row.get(23)?,
        })
    }

    fn into_model(self) -> Result<Insight, DatabaseError> {
        let scope = match InsightTier::from_str(&self.tier)? {
            InsightTier::Individual => InsightScope::Individual {
                child_id: parse_opt_uuid(self.child_id)?.ok_or_else(|| {
                    DatabaseError::ConstraintViolation(format!(
                        "Individual insight {} has no child",
                        self.id
                    ))
                })?,
            },
            InsightTier::Cohort => InsightScope::Cohort {
                cohort_id: parse_opt_uuid(self.cohort_id)?.ok_or_else(|| {
                    DatabaseError::ConstraintViolation(format!(
                        "Cohort insight {} has no cohort",
                        self.id
                    ))
                })?,
                families_affected: self.families_affected.unwrap_or(0),
                families_total: self.families_total.unwrap_or(0),
            },
            InsightTier::Global => InsightScope::Global,
        };

        let date_range = match (self.date_from, self.date_to) {
            (Some(from), Some(to)) => Some(DateRange::new(parse_date(&from)?, parse_date(&to)?)),
            _ => None,
        };

        let pattern_link = match (self.link_kind, self.link_id) {
            (Some(kind), Some(id)) => Some(PatternLink::from_parts(
                PatternLinkKind::from_str(&kind)?,
                parse_uuid(&id)?,
            )),
            _ => None,
        };

        let detail: InsightDetail = serde_json::from_str(&self.detail_json)?;

        Ok(Insight {
            id: parse_uuid(&self.id)?,
            scope,
            category: InsightCategory::from_str(&self.category)?,
            summary_simple: self.summary_simple,
            summary_detailed: self.summary_detailed,
            detail,
            confidence: self.confidence,
            sample_size: self.sample_size,
            strength: self.strength,
            significance: self.significance,
            date_range,
            pattern_link,
            clinically_validated: self.clinically_validated != 0,
            validation_count: self.validation_count,
            active: self.active != 0,
            surfaced_at: parse_opt_datetime(self.surfaced_at)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// Columns (tier, child_id, cohort_id, families_affected, families_total) for a scope.
fn scope_columns(
    scope: &InsightScope,
) -> (&'static str, Option<String>, Option<String>, Option<u32>, Option<u32>) {
    match scope {
        InsightScope::Individual { child_id } => {
            ("individual", Some(child_id.to_string()), None, None, None)
        }
        InsightScope::Cohort {
            cohort_id,
            families_affected,
            families_total,
        } => (
            "cohort",
            None,
            Some(cohort_id.to_string()),
            Some(*families_affected),
            Some(*families_total),
        ),
        InsightScope::Global => ("global", None, None, None, None),
    }
}

fn collect_insights(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<Insight>, DatabaseError> {
    let rows = stmt.query_map(params, InsightRow::from_row)?;
    let mut insights = Vec::new();
    for row in rows {
        insights.push(row?.into_model()?);
    }
    Ok(insights)
}

pub fn insert_insight(conn: &Connection, insight: &Insight) -> Result<(), DatabaseError> {
    let (tier, child_id, cohort_id, affected, total) = scope_columns(&insight.scope);
    conn.execute(
        "INSERT INTO insights
         (id, tier, child_id, cohort_id, families_affected, families_total, category,
          summary_simple, summary_detailed, detail_json, confidence, sample_size, strength,
          significance, date_from, date_to, link_kind, link_id, clinically_validated,
          validation_count, active, surfaced_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
        params![
            insight.id.to_string(),
            tier,
            child_id,
            cohort_id,
            affected,
            total,
            insight.category.as_str(),
            insight.summary_simple,
            insight.summary_detailed,
            serde_json::to_string(&insight.detail)?,
            insight.confidence,
            insight.sample_size,
            insight.strength,
            insight.significance,
            insight.date_range.map(|r| fmt_date(&r.start)),
            insight.date_range.map(|r| fmt_date(&r.end)),
            insight.pattern_link.map(|l| l.kind().as_str()),
            insight.pattern_link.map(|l| l.id().to_string()),
            insight.clinically_validated as i32,
            insight.validation_count,
            insight.active as i32,
            insight.surfaced_at.map(|t| fmt_datetime(&t)),
            fmt_datetime(&insight.created_at),
            fmt_datetime(&insight.updated_at),
        ],
    )?;
    Ok(())
}

/// Overwrite the content columns of an existing insight.
/// Creation time, validation counters and surfacing are left untouched.
pub fn update_insight_content(conn: &Connection, insight: &Insight) -> Result<(), DatabaseError> {
    let (tier, child_id, cohort_id, affected, total) = scope_columns(&insight.scope);
    let updated = conn.execute(
        "UPDATE insights
         SET tier = ?1, child_id = ?2, cohort_id = ?3, families_affected = ?4,
             families_total = ?5, category = ?6, summary_simple = ?7, summary_detailed = ?8,
             detail_json = ?9, confidence = ?10, sample_size = ?11, strength = ?12,
             significance = ?13, date_from = ?14, date_to = ?15, updated_at = ?16
         WHERE id = ?17",
        params![
            tier,
            child_id,
            cohort_id,
            affected,
            total,
            insight.category.as_str(),
            insight.summary_simple,
            insight.summary_detailed,
            serde_json::to_string(&insight.detail)?,
            insight.confidence,
            insight.sample_size,
            insight.strength,
            insight.significance,
            insight.date_range.map(|r| fmt_date(&r.start)),
            insight.date_range.map(|r| fmt_date(&r.end)),
            fmt_datetime(&insight.updated_at),
            insight.id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Insight".into(),
            id: insight.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_insight(conn: &Connection, id: &Uuid) -> Result<Insight, DatabaseError> {
    let sql = format!("SELECT {INSIGHT_COLUMNS} FROM insights WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], InsightRow::from_row)
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "Insight".into(),
            id: id.to_string(),
        })?
        .into_model()
}

/// The active insight derived from a given pattern, if any.
pub fn find_active_insight_by_link(
    conn: &Connection,
    link: &PatternLink,
) -> Result<Option<Insight>, DatabaseError> {
    let sql = format!(
        "SELECT {INSIGHT_COLUMNS} FROM insights
         WHERE link_kind = ?1 AND link_id = ?2 AND active = 1
         ORDER BY created_at ASC LIMIT 1"
    );
    conn.query_row(
        &sql,
        params![link.kind().as_str(), link.id().to_string()],
        InsightRow::from_row,
    )
    .optional()?
    .map(InsightRow::into_model)
    .transpose()
}

/// Number of active insights derived from a pattern (0 or 1 when healthy).
pub fn count_active_insights_for_link(
    conn: &Connection,
    link: &PatternLink,
) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM insights WHERE link_kind = ?1 AND link_id = ?2 AND active = 1",
        params![link.kind().as_str(), link.id().to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Deactivate the insights derived from a pattern. Returns how many changed.
pub fn deactivate_insights_for_link(
    conn: &Connection,
    link: &PatternLink,
    now: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE insights SET active = 0, updated_at = ?1
         WHERE link_kind = ?2 AND link_id = ?3 AND active = 1",
        params![fmt_datetime(&now), link.kind().as_str(), link.id().to_string()],
    )?;
    Ok(updated)
}

pub fn increment_validation_count(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE insights SET validation_count = validation_count + 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Insight".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Set the clinically-validated flag. There is deliberately no unset.
pub fn set_clinically_validated(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE insights SET clinically_validated = 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Insight".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Record when an insight was first shown to a caregiver.
pub fn mark_insight_surfaced(
    conn: &Connection,
    id: &Uuid,
    now: NaiveDateTime,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE insights SET surfaced_at = COALESCE(surfaced_at, ?1) WHERE id = ?2",
        params![fmt_datetime(&now), id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Insight".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn list_individual_insights(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<Vec<Insight>, DatabaseError> {
    let sql = format!(
        "SELECT {INSIGHT_COLUMNS} FROM insights
         WHERE tier = 'individual' AND child_id = ?1 AND active = 1
         ORDER BY confidence DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    collect_insights(&mut stmt, params![child_id.to_string()])
}

pub fn list_cohort_insights(
    conn: &Connection,
    cohort_id: &Uuid,
) -> Result<Vec<Insight>, DatabaseError> {
    let sql = format!(
        "SELECT {INSIGHT_COLUMNS} FROM insights
         WHERE tier = 'cohort' AND cohort_id = ?1 AND active = 1
         ORDER BY confidence DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    collect_insights(&mut stmt, params![cohort_id.to_string()])
}

pub fn list_global_insights(conn: &Connection) -> Result<Vec<Insight>, DatabaseError> {
    let sql = format!(
        "SELECT {INSIGHT_COLUMNS} FROM insights
         WHERE tier = 'global' AND active = 1
         ORDER BY confidence DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    collect_insights(&mut stmt, [])
}

pub fn count_clinically_validated_insights(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM insights
         WHERE tier = 'individual' AND child_id = ?1 AND clinically_validated = 1",
        params![child_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}
