use std::collections::HashMap;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::{fmt_datetime, parse_datetime, DatabaseError};
use crate::models::{DateRange, Observation};

/// Append a raw observation. Observation entry is owned by the per-domain
/// logs; this exists for import jobs and tests.
pub fn insert_observation(
    conn: &Connection,
    child_id: &Uuid,
    metric: &str,
    observed_at: NaiveDateTime,
    value: f64,
) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO observations (id, child_id, metric, observed_at, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.to_string(),
            child_id.to_string(),
            metric,
            fmt_datetime(&observed_at),
            value,
        ],
    )?;
    Ok(id)
}

/// Time-ordered series of one metric for one child over a date range.
pub fn fetch_series(
    conn: &Connection,
    child_id: &Uuid,
    metric: &str,
    range: &DateRange,
) -> Result<Vec<Observation>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT observed_at, value FROM observations
         WHERE child_id = ?1 AND metric = ?2
           AND observed_at >= ?3 AND observed_at < ?4
         ORDER BY observed_at ASC",
    )?;

    let rows = stmt.query_map(
        params![
            child_id.to_string(),
            metric,
            fmt_datetime(&range.start_datetime()),
            fmt_datetime(&range.end_datetime_exclusive()),
        ],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
    )?;

    let mut series = Vec::new();
    for row in rows {
        let (observed_at, value) = row?;
        series.push(Observation::new(parse_datetime(&observed_at)?, value));
    }
    Ok(series)
}

/// All series for a child across a date range, keyed by metric name.
pub fn fetch_all_series(
    conn: &Connection,
    child_id: &Uuid,
    range: &DateRange,
) -> Result<HashMap<String, Vec<Observation>>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT metric, observed_at, value FROM observations
         WHERE child_id = ?1 AND observed_at >= ?2 AND observed_at < ?3
         ORDER BY metric, observed_at ASC",
    )?;

    let rows = stmt.query_map(
        params![
            child_id.to_string(),
            fmt_datetime(&range.start_datetime()),
            fmt_datetime(&range.end_datetime_exclusive()),
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        },
    )?;

    let mut by_metric: HashMap<String, Vec<Observation>> = HashMap::new();
    for row in rows {
        let (metric, observed_at, value) = row?;
        by_metric
            .entry(metric)
            .or_default()
            .push(Observation::new(parse_datetime(&observed_at)?, value));
    }
    Ok(by_metric)
}
