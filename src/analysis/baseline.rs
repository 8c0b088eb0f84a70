use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::repository;
use crate::models::{Baseline, DateRange, Observation};

use super::source::ObservationSource;
use super::stats;
use super::AnalysisError;

/// Mean and sample standard deviation of a series.
///
/// Fails with `InsufficientData` below `min_baseline_samples`; callers treat
/// that as "no baseline yet".
pub fn compute_baseline(
    child_id: Uuid,
    metric: &str,
    series: &[Observation],
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<Baseline, AnalysisError> {
    if series.len() < config.min_baseline_samples as usize {
        return Err(AnalysisError::InsufficientData {
            metric: metric.to_string(),
            found: series.len(),
            required: config.min_baseline_samples,
        });
    }

    let values: Vec<f64> = series.iter().map(|o| o.value).collect();
    let insufficient = || AnalysisError::InsufficientData {
        metric: metric.to_string(),
        found: values.len(),
        required: config.min_baseline_samples,
    };
    let mean = stats::mean(&values).ok_or_else(insufficient)?;
    let std_dev = stats::sample_std_dev(&values).ok_or_else(insufficient)?;

    Ok(Baseline {
        id: Uuid::new_v4(),
        child_id,
        metric: metric.to_string(),
        mean,
        std_dev,
        sample_size: values.len() as u32,
        computed_at: now,
        valid_until: now + Duration::days(config.baseline_validity_days),
        superseded_at: None,
    })
}

/// Look-back window ending on the day of `now`.
fn lookback_range(now: NaiveDateTime, config: &EngineConfig) -> DateRange {
    let end = now.date();
    DateRange::new(end - Duration::days(config.baseline_lookback_days - 1), end)
}

/// Recompute the baseline for (child, metric) from the look-back window and
/// store it, superseding the previous one.
pub fn refresh_baseline(
    conn: &Connection,
    source: &dyn ObservationSource,
    child_id: &Uuid,
    metric: &str,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<Baseline, AnalysisError> {
    let range = lookback_range(now, config);
    let series = source.series(conn, child_id, metric, &range)?;
    let baseline = compute_baseline(*child_id, metric, &series, now, config)?;
    repository::insert_baseline_superseding(conn, &baseline)?;

    tracing::debug!(
        child_id = %child_id,
        metric,
        sample_size = baseline.sample_size,
        "Baseline refreshed"
    );
    Ok(baseline)
}

/// The valid baseline for (child, metric), recomputing it if stale or absent.
pub fn ensure_baseline(
    conn: &Connection,
    source: &dyn ObservationSource,
    child_id: &Uuid,
    metric: &str,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<Baseline, AnalysisError> {
    if let Some(valid) = repository::get_valid_baseline(conn, child_id, metric, now)? {
        return Ok(valid);
    }
    match refresh_baseline(conn, source, child_id, metric, now, config) {
        Ok(b) => Ok(b),
        Err(AnalysisError::InsufficientData { found, required, .. }) => {
            Err(AnalysisError::BaselineUnavailable {
                metric: metric.to_string(),
                reason: format!("{found} samples in look-back window, need {required}"),
            })
        }
        Err(e) => Err(e),
    }
}
