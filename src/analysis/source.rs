use std::collections::HashMap;

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository;
use crate::models::{DateRange, Observation};

use super::AnalysisError;

/// Read contract for raw observations owned by the per-domain logs.
pub trait ObservationSource: Send + Sync {
    /// Time-ordered observations of one metric for one child within `range`.
    fn series(
        &self,
        conn: &Connection,
        child_id: &Uuid,
        metric: &str,
        range: &DateRange,
    ) -> Result<Vec<Observation>, AnalysisError>;

    /// Every metric observed for the child within `range`.
    fn all_series(
        &self,
        conn: &Connection,
        child_id: &Uuid,
        range: &DateRange,
    ) -> Result<HashMap<String, Vec<Observation>>, AnalysisError>;
}

/// Default source: the `observations` table in the engine database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteObservationSource;

impl ObservationSource for SqliteObservationSource {
    fn series(
        &self,
        conn: &Connection,
        child_id: &Uuid,
        metric: &str,
        range: &DateRange,
    ) -> Result<Vec<Observation>, AnalysisError> {
        Ok(repository::fetch_series(conn, child_id, metric, range)?)
    }

    fn all_series(
        &self,
        conn: &Connection,
        child_id: &Uuid,
        range: &DateRange,
    ) -> Result<HashMap<String, Vec<Observation>>, AnalysisError> {
        Ok(repository::fetch_all_series(conn, child_id, range)?)
    }
}
