pub mod pool;
pub mod runner;
pub mod sweep;

pub use pool::{start_engine, EngineHandle};
pub use runner::{run_correlation, RunSummary};
pub use sweep::sweep_stale_jobs;

use chrono::{NaiveDateTime, Utc};

/// Wall-clock time used by the background loops. Timestamps are stored as UTC.
pub(crate) fn utc_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
