use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository;
use crate::analysis::AnalysisError;

/// Reset requests stuck in `processing` for longer than `timeout` to `pending`.
///
/// Each reset is its own conditional UPDATE, so when two sweeps race over the
/// same stale request only one of them reclaims it. Returns the ids this sweep
/// reclaimed.
pub fn sweep_stale_jobs(
    conn: &Connection,
    now: NaiveDateTime,
    timeout: Duration,
) -> Result<Vec<Uuid>, AnalysisError> {
    let cutoff = now - timeout;
    let mut reclaimed = Vec::new();
    for id in repository::list_stale_processing_ids(conn, cutoff)? {
        if repository::reclaim_request(conn, &id, cutoff)? {
            tracing::warn!(request_id = %id, "Stale correlation request reclaimed");
            reclaimed.push(id);
        }
    }
    Ok(reclaimed)
}
