use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{fmt_datetime, parse_datetime, parse_opt_datetime, parse_uuid, DatabaseError};
use crate::models::Baseline;

const BASELINE_COLUMNS: &str = "id, child_id, metric, mean, std_dev, sample_size,
     computed_at, valid_until, superseded_at";

struct BaselineRow {
    id: String,
    child_id: String,
    metric: String,
    mean: f64,
    std_dev: f64,
    sample_size: u32,
    computed_at: String,
    valid_until: String,
    superseded_at: Option<String>,
}

impl BaselineRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            child_id: row.get(1)?,
            metric: row.get(2)?,
            mean: row.get(3)?,
            std_dev: row.get(4)?,
            sample_size: row.get(5)?,
            computed_at: row.get(6)?,
            valid_until: row.get(7)?,
            superseded_at: row.get(8)?,
        })
    }

    fn into_model(self) -> Result<Baseline, DatabaseError> {
        Ok(Baseline {
            id: parse_uuid(&self.id)?,
            child_id: parse_uuid(&self.child_id)?,
            metric: self.metric,
            mean: self.mean,
            std_dev: self.std_dev,
            sample_size: self.sample_size,
            computed_at: parse_datetime(&self.computed_at)?,
            valid_until: parse_datetime(&self.valid_until)?,
            superseded_at: parse_opt_datetime(self.superseded_at)?,
        })
    }
}

/// Insert a freshly computed baseline and expire the current one for the
/// same (child, metric) in a single transaction. Earlier rows are kept.
pub fn insert_baseline_superseding(
    conn: &Connection,
    baseline: &Baseline,
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "UPDATE baselines SET superseded_at = ?1
         WHERE child_id = ?2 AND metric = ?3 AND superseded_at IS NULL",
        params![
            fmt_datetime(&baseline.computed_at),
            baseline.child_id.to_string(),
            baseline.metric,
        ],
    )?;

    tx.execute(
        "INSERT INTO baselines
         (id, child_id, metric, mean, std_dev, sample_size, computed_at, valid_until, superseded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
        params![
            baseline.id.to_string(),
            baseline.child_id.to_string(),
            baseline.metric,
            baseline.mean,
            baseline.std_dev,
            baseline.sample_size,
            fmt_datetime(&baseline.computed_at),
            fmt_datetime(&baseline.valid_until),
        ],
    )?;

    tx.commit()?;
    Ok(())
}

/// The newest non-superseded baseline for (child, metric), valid or not.
pub fn get_current_baseline(
    conn: &Connection,
    child_id: &Uuid,
    metric: &str,
) -> Result<Option<Baseline>, DatabaseError> {
    let sql = format!(
        "SELECT {BASELINE_COLUMNS} FROM baselines
         WHERE child_id = ?1 AND metric = ?2 AND superseded_at IS NULL
         ORDER BY computed_at DESC LIMIT 1"
    );
    conn.query_row(&sql, params![child_id.to_string(), metric], BaselineRow::from_row)
        .optional()?
        .map(BaselineRow::into_model)
        .transpose()
}

/// Current baseline only if still inside its validity window at `now`.
pub fn get_valid_baseline(
    conn: &Connection,
    child_id: &Uuid,
    metric: &str,
    now: NaiveDateTime,
) -> Result<Option<Baseline>, DatabaseError> {
    Ok(get_current_baseline(conn, child_id, metric)?.filter(|b| b.is_valid_at(now)))
}

/// All baselines ever computed for (child, metric), newest first.
pub fn list_baseline_history(
    conn: &Connection,
    child_id: &Uuid,
    metric: &str,
) -> Result<Vec<Baseline>, DatabaseError> {
    let sql = format!(
        "SELECT {BASELINE_COLUMNS} FROM baselines
         WHERE child_id = ?1 AND metric = ?2
         ORDER BY computed_at DESC, superseded_at IS NULL DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![child_id.to_string(), metric], BaselineRow::from_row)?;

    let mut baselines = Vec::new();
    for row in rows {
        baselines.push(row?.into_model()?);
    }
    Ok(baselines)
}
