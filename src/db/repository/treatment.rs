use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{
    fmt_datetime, parse_datetime, parse_opt_datetime, parse_opt_uuid, parse_uuid, DatabaseError,
};
use crate::models::enums::{ChangeType, InterrogativeStatus, PromptSource};
use crate::models::{TreatmentChange, TreatmentChangeResponse};

const CHANGE_COLUMNS: &str = "id, child_id, caregiver_id, change_type, description, changed_at,
     related_insight_id, hours_since_insight, interrogative_status, prompted_at, answered_at,
     created_at";

struct ChangeRow {
    id: String,
    child_id: String,
    caregiver_id: String,
    change_type: String,
    description: String,
    changed_at: String,
    related_insight_id: Option<String>,
    hours_since_insight: Option<i64>,
    interrogative_status: String,
    prompted_at: Option<String>,
    answered_at: Option<String>,
    created_at: String,
}

impl ChangeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            caregiver_id: row.get(2)?,
            change_type: row.get(3)?,
            description: row.get(4)?,
            changed_at: row.get(5)?,
            related_insight_id: row.get(6)?,
            hours_since_insight: row.get(7)?,
            interrogative_status: row.get(8)?,
            prompted_at: row.get(9)?,
            answered_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_model(self) -> Result<TreatmentChange, DatabaseError> {
        Ok(TreatmentChange {
            id: parse_uuid(&self.id)?,
            child_id: parse_uuid(&self.child_id)?,
            caregiver_id: parse_uuid(&self.caregiver_id)?,
            change_type: ChangeType::from_str(&self.change_type)?,
            description: self.description,
            changed_at: parse_datetime(&self.changed_at)?,
            related_insight_id: parse_opt_uuid(self.related_insight_id)?,
            hours_since_insight: self.hours_since_insight,
            interrogative_status: InterrogativeStatus::from_str(&self.interrogative_status)?,
            prompted_at: parse_opt_datetime(self.prompted_at)?,
            answered_at: parse_opt_datetime(self.answered_at)?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

pub fn insert_treatment_change(
    conn: &Connection,
    change: &TreatmentChange,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO treatment_changes
         (id, child_id, caregiver_id, change_type, description, changed_at,
          related_insight_id, hours_since_insight, interrogative_status, prompted_at,
          answered_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            change.id.to_string(),
            change.child_id.to_string(),
            change.caregiver_id.to_string(),
            change.change_type.as_str(),
            change.description,
            fmt_datetime(&change.changed_at),
            change.related_insight_id.map(|id| id.to_string()),
            change.hours_since_insight,
            change.interrogative_status.as_str(),
            change.prompted_at.as_ref().map(fmt_datetime),
            change.answered_at.as_ref().map(fmt_datetime),
            fmt_datetime(&change.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_treatment_change(conn: &Connection, id: &Uuid) -> Result<TreatmentChange, DatabaseError> {
    let sql = format!("SELECT {CHANGE_COLUMNS} FROM treatment_changes WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], ChangeRow::from_row)
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "TreatmentChange".into(),
            id: id.to_string(),
        })?
        .into_model()
}

/// Changes still waiting to be prompted, oldest first.
pub fn list_pending_interrogatives(conn: &Connection) -> Result<Vec<TreatmentChange>, DatabaseError> {
    let sql = format!(
        "SELECT {CHANGE_COLUMNS} FROM treatment_changes
         WHERE interrogative_status = 'pending'
         ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], ChangeRow::from_row)?;

    let mut changes = Vec::new();
    for row in rows {
        changes.push(row?.into_model()?);
    }
    Ok(changes)
}

pub fn list_changes_for_child(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<Vec<TreatmentChange>, DatabaseError> {
    let sql = format!(
        "SELECT {CHANGE_COLUMNS} FROM treatment_changes
         WHERE child_id = ?1
         ORDER BY changed_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![child_id.to_string()], ChangeRow::from_row)?;

    let mut changes = Vec::new();
    for row in rows {
        changes.push(row?.into_model()?);
    }
    Ok(changes)
}

/// pending → prompted. False if the change already left `pending`.
pub fn mark_prompted(conn: &Connection, id: &Uuid, now: NaiveDateTime) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE treatment_changes
         SET interrogative_status = 'prompted', prompted_at = ?1
         WHERE id = ?2 AND interrogative_status = 'pending'",
        params![fmt_datetime(&now), id.to_string()],
    )?;
    Ok(updated == 1)
}

/// prompted → answered. False unless the change is currently `prompted`.
pub fn mark_answered(conn: &Connection, id: &Uuid, now: NaiveDateTime) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE treatment_changes
         SET interrogative_status = 'answered', answered_at = ?1
         WHERE id = ?2 AND interrogative_status = 'prompted'",
        params![fmt_datetime(&now), id.to_string()],
    )?;
    Ok(updated == 1)
}

/// Prompts sent to a caregiver at or after `since`.
pub fn count_prompted_since(
    conn: &Connection,
    caregiver_id: &Uuid,
    since: NaiveDateTime,
) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM treatment_changes
         WHERE caregiver_id = ?1 AND prompted_at IS NOT NULL AND prompted_at >= ?2",
        params![caregiver_id.to_string(), fmt_datetime(&since)],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn insert_response(
    conn: &Connection,
    response: &TreatmentChangeResponse,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO treatment_change_responses
         (id, treatment_change_id, related_to_analysis, prompted_by, notes, responded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            response.id.to_string(),
            response.treatment_change_id.to_string(),
            response.related_to_analysis as i32,
            response.prompted_by.as_str(),
            response.notes,
            fmt_datetime(&response.responded_at),
        ],
    )?;
    Ok(())
}

pub fn get_response_for_change(
    conn: &Connection,
    treatment_change_id: &Uuid,
) -> Result<Option<TreatmentChangeResponse>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, treatment_change_id, related_to_analysis, prompted_by, notes, responded_at
             FROM treatment_change_responses WHERE treatment_change_id = ?1",
            params![treatment_change_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((id, change_id, related, prompted_by, notes, responded_at)) => {
            Ok(Some(TreatmentChangeResponse {
                id: parse_uuid(&id)?,
                treatment_change_id: parse_uuid(&change_id)?,
                related_to_analysis: related != 0,
                prompted_by: PromptSource::from_str(&prompted_by)?,
                notes,
                responded_at: parse_datetime(&responded_at)?,
            }))
        }
    }
}

/// Interrogative status counts for a child.
pub fn count_interrogatives_by_status(
    conn: &Connection,
    child_id: &Uuid,
) -> Result<HashMap<InterrogativeStatus, u32>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT interrogative_status, COUNT(*) FROM treatment_changes
         WHERE child_id = ?1 GROUP BY interrogative_status",
    )?;
    let rows = stmt.query_map(params![child_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
    })?;

    let mut counts = HashMap::new();
    for row in rows {
        let (status, count) = row?;
        counts.insert(InterrogativeStatus::from_str(&status)?, count);
    }
    Ok(counts)
}

/// Answers for a child's changes that the caregiver linked to an insight.
pub fn count_related_responses(conn: &Connection, child_id: &Uuid) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM treatment_change_responses r
         JOIN treatment_changes t ON t.id = r.treatment_change_id
         WHERE t.child_id = ?1 AND r.related_to_analysis = 1",
        params![child_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}
