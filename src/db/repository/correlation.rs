use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{
    fmt_date, fmt_datetime, parse_date, parse_datetime, parse_opt_datetime, parse_uuid,
    DatabaseError,
};
use crate::models::enums::RequestStatus;
use crate::models::{CorrelationOutcome, CorrelationRequest, DateRange};

const REQUEST_COLUMNS: &str = "id, child_id, requested_by, input_factors, output_factors,
     date_from, date_to, lag_hours, status, result_json, error_kind, error_detail,
     queued_at, started_at, completed_at, claimed_by, reclaim_count, pattern_ids";

struct RequestRow {
    id: String,
    child_id: String,
    requested_by: String,
    input_factors: String,
    output_factors: String,
    date_from: String,
    date_to: String,
    lag_hours: i64,
    status: String,
    result_json: Option<String>,
    error_kind: Option<String>,
    error_detail: Option<String>,
    queued_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    claimed_by: Option<String>,
    reclaim_count: u32,
    pattern_ids: String,
}

impl RequestRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            requested_by: row.get(2)?,
            input_factors: row.get(3)?,
            output_factors: row.get(4)?,
            date_from: row.get(5)?,
            date_to: row.get(6)?,
            lag_hours: row.get(7)?,
            status: row.get(8)?,
            result_json: row.get(9)?,
            error_kind: row.get(10)?,
            error_detail: row.get(11)?,
            queued_at: row.get(12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
            claimed_by: row.get(15)?,
            reclaim_count: row.get(16)?,
            pattern_ids: row.get(17)?,
        })
    }

    fn into_model(self) -> Result<CorrelationRequest, DatabaseError> {
        let result: Option<CorrelationOutcome> = self
            .result_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(CorrelationRequest {
            id: parse_uuid(&self.id)?,
            child_id: parse_uuid(&self.child_id)?,
            requested_by: self.requested_by,
            input_factors: serde_json::from_str(&self.input_factors)?,
            output_factors: serde_json::from_str(&self.output_factors)?,
            date_range: DateRange::new(parse_date(&self.date_from)?, parse_date(&self.date_to)?),
            lag_hours: self.lag_hours,
            status: RequestStatus::from_str(&self.status)?,
            result,
            error_kind: self.error_kind,
            error_detail: self.error_detail,
            queued_at: parse_datetime(&self.queued_at)?,
            started_at: parse_opt_datetime(self.started_at)?,
            completed_at: parse_opt_datetime(self.completed_at)?,
            claimed_by: self.claimed_by,
            reclaim_count: self.reclaim_count,
            pattern_ids: serde_json::from_str(&self.pattern_ids)?,
        })
    }
}

pub fn insert_correlation_request(
    conn: &Connection,
    request: &CorrelationRequest,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO correlation_requests
         (id, child_id, requested_by, input_factors, output_factors, date_from, date_to,
          lag_hours, status, queued_at, reclaim_count, pattern_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            request.id.to_string(),
            request.child_id.to_string(),
            request.requested_by,
            serde_json::to_string(&request.input_factors)?,
            serde_json::to_string(&request.output_factors)?,
            fmt_date(&request.date_range.start),
            fmt_date(&request.date_range.end),
            request.lag_hours,
            request.status.as_str(),
            fmt_datetime(&request.queued_at),
            request.reclaim_count,
            serde_json::to_string(&request.pattern_ids)?,
        ],
    )?;
    Ok(())
}

pub fn get_correlation_request(
    conn: &Connection,
    id: &Uuid,
) -> Result<CorrelationRequest, DatabaseError> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM correlation_requests WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], RequestRow::from_row)
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound {
            entity_type: "CorrelationRequest".into(),
            id: id.to_string(),
        })?
        .into_model()
}

/// Atomically move a request from `pending` to `processing` for `worker`.
/// Returns false when another claimant got there first.
pub fn claim_request(
    conn: &Connection,
    id: &Uuid,
    worker: &str,
    now: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE correlation_requests
         SET status = 'processing', started_at = ?1, claimed_by = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![fmt_datetime(&now), worker, id.to_string()],
    )?;
    Ok(updated == 1)
}

/// Store the result and mark `completed`. Only the worker still holding the
/// claim may complete; returns false if the claim was lost to a reclaim.
pub fn complete_request(
    conn: &Connection,
    id: &Uuid,
    worker: &str,
    outcome: &CorrelationOutcome,
    now: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE correlation_requests
         SET status = 'completed', result_json = ?1, completed_at = ?2
         WHERE id = ?3 AND status = 'processing' AND claimed_by = ?4",
        params![
            serde_json::to_string(outcome)?,
            fmt_datetime(&now),
            id.to_string(),
            worker,
        ],
    )?;
    Ok(updated == 1)
}

/// Mark `failed` with an error kind and operator-facing detail.
/// Same claim rule as [`complete_request`].
pub fn fail_request(
    conn: &Connection,
    id: &Uuid,
    worker: &str,
    error_kind: &str,
    error_detail: &str,
    now: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE correlation_requests
         SET status = 'failed', error_kind = ?1, error_detail = ?2, completed_at = ?3
         WHERE id = ?4 AND status = 'processing' AND claimed_by = ?5",
        params![error_kind, error_detail, fmt_datetime(&now), id.to_string(), worker],
    )?;
    Ok(updated == 1)
}

/// Record the family patterns a run produced. Allowed on terminal requests.
pub fn set_request_pattern_ids(
    conn: &Connection,
    id: &Uuid,
    pattern_ids: &[Uuid],
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE correlation_requests SET pattern_ids = ?1 WHERE id = ?2",
        params![serde_json::to_string(pattern_ids)?, id.to_string()],
    )?;
    Ok(())
}

/// Oldest pending requests first.
pub fn list_pending_request_ids(conn: &Connection, limit: u32) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM correlation_requests
         WHERE status = 'pending'
         ORDER BY queued_at ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row?)?);
    }
    Ok(ids)
}

/// Requests that entered `processing` before `cutoff`.
pub fn list_stale_processing_ids(
    conn: &Connection,
    cutoff: NaiveDateTime,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM correlation_requests
         WHERE status = 'processing' AND started_at < ?1
         ORDER BY started_at ASC",
    )?;
    let rows = stmt.query_map(params![fmt_datetime(&cutoff)], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row?)?);
    }
    Ok(ids)
}

/// Reset one stale `processing` request to `pending`. The predicate is
/// re-checked inside the UPDATE, so concurrent sweeps reclaim it once.
pub fn reclaim_request(
    conn: &Connection,
    id: &Uuid,
    cutoff: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE correlation_requests
         SET status = 'pending', started_at = NULL, claimed_by = NULL,
             reclaim_count = reclaim_count + 1
         WHERE id = ?1 AND status = 'processing' AND started_at < ?2",
        params![id.to_string(), fmt_datetime(&cutoff)],
    )?;
    Ok(updated == 1)
}

/// Request counts per lifecycle status.
pub fn count_requests_by_status(
    conn: &Connection,
) -> Result<HashMap<RequestStatus, u32>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM correlation_requests GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?;

    let mut counts = HashMap::new();
    for row in rows {
        let (status, count) = row?;
        counts.insert(RequestStatus::from_str(&status)?, count);
    }
    Ok(counts)
}
