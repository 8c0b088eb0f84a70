use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::repository;
use crate::models::enums::RequestStatus;
use crate::models::{
    CorrelationOutcome, CorrelationRequest, DateRange, FactorCorrelation, NewCorrelationRequest,
    Observation, PairOutcome,
};

use super::baseline::ensure_baseline;
use super::source::ObservationSource;
use super::stats;
use super::AnalysisError;

// ═══════════════════════════════════════════════════════════
// Queueing
// ═══════════════════════════════════════════════════════════

/// Validate and queue a correlation request in `pending`.
pub fn request_correlation(
    conn: &Connection,
    new: NewCorrelationRequest,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<CorrelationRequest, AnalysisError> {
    let clean = |factors: Vec<String>| -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for f in factors {
            let f = f.trim().to_string();
            if !f.is_empty() && !out.contains(&f) {
                out.push(f);
            }
        }
        out
    };
    let input_factors = clean(new.input_factors);
    let output_factors = clean(new.output_factors);

    if input_factors.is_empty() || output_factors.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "at least one input and one output factor are required".into(),
        ));
    }

    let lag_hours = new.lag_hours.unwrap_or(config.default_lag_hours);
    if lag_hours < 0 {
        return Err(AnalysisError::InvalidInput(format!("negative lag: {lag_hours}h")));
    }
    if lag_hours > config.max_lag_hours {
        return Err(AnalysisError::InvalidInput(format!(
            "lag of {lag_hours}h exceeds the {}h maximum",
            config.max_lag_hours
        )));
    }

    let request = CorrelationRequest {
        id: Uuid::new_v4(),
        child_id: new.child_id,
        requested_by: new.requested_by,
        input_factors,
        output_factors,
        date_range: new.date_range,
        lag_hours,
        status: RequestStatus::Pending,
        result: None,
        error_kind: None,
        error_detail: None,
        queued_at: now,
        started_at: None,
        completed_at: None,
        claimed_by: None,
        reclaim_count: 0,
        pattern_ids: Vec::new(),
    };

    if request.factor_pairs().is_empty() {
        return Err(AnalysisError::InvalidInput(
            "every requested pair compares a factor with itself".into(),
        ));
    }

    repository::insert_correlation_request(conn, &request)?;
    tracing::info!(
        request_id = %request.id,
        child_id = %request.child_id,
        pairs = request.factor_pairs().len(),
        lag_hours,
        "Correlation request queued"
    );
    Ok(request)
}

// ═══════════════════════════════════════════════════════════
// Alignment & computation
// ═══════════════════════════════════════════════════════════

fn daily_means(series: &[Observation], shift: Duration) -> BTreeMap<NaiveDate, f64> {
    let mut sums: BTreeMap<NaiveDate, (f64, u32)> = BTreeMap::new();
    for obs in series {
        let Some(shifted) = obs.observed_at.checked_add_signed(shift) else {
            continue;
        };
        let entry = sums.entry(shifted.date()).or_insert((0.0, 0));
        entry.0 += obs.value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(day, (sum, count))| (day, sum / count as f64))
        .collect()
}

/// Pair the input and output series by calendar day.
///
/// Each input observation is moved forward by `lag_hours` first, so an input on
/// day D pairs with the output on day D + lag. Several readings on one day are
/// averaged. Only output days inside `range` produce pairs.
pub fn align_daily(
    input: &[Observation],
    output: &[Observation],
    lag_hours: i64,
    range: &DateRange,
) -> (Vec<f64>, Vec<f64>) {
    let Some(shift) = Duration::try_hours(lag_hours) else {
        return (Vec::new(), Vec::new());
    };
    let inputs = daily_means(input, shift);
    let outputs = daily_means(output, Duration::zero());

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (day, y) in outputs {
        if !range.contains(day) {
            continue;
        }
        if let Some(x) = inputs.get(&day) {
            xs.push(*x);
            ys.push(y);
        }
    }
    (xs, ys)
}

/// Correlate one factor pair. Baseline references are left empty.
pub fn compute_pair(
    input_factor: &str,
    output_factor: &str,
    input: &[Observation],
    output: &[Observation],
    lag_hours: i64,
    range: &DateRange,
    config: &EngineConfig,
) -> Result<FactorCorrelation, AnalysisError> {
    let (xs, ys) = align_daily(input, output, lag_hours, range);
    let n = xs.len();

    if n < config.min_paired_observations as usize {
        return Err(AnalysisError::InsufficientPairedData {
            input: input_factor.to_string(),
            output: output_factor.to_string(),
            found: n,
            required: config.min_paired_observations,
        });
    }
    if stats::is_constant(&xs) {
        return Err(AnalysisError::DegenerateSeries {
            metric: input_factor.to_string(),
        });
    }
    if stats::is_constant(&ys) {
        return Err(AnalysisError::DegenerateSeries {
            metric: output_factor.to_string(),
        });
    }

    let strength = stats::pearson(&xs, &ys).ok_or_else(|| AnalysisError::DegenerateSeries {
        metric: format!("{input_factor}/{output_factor}"),
    })?;
    let p_value = stats::correlation_p_value(strength, n);
    let significance = 1.0 - p_value;

    Ok(FactorCorrelation {
        input_factor: input_factor.to_string(),
        output_factor: output_factor.to_string(),
        lag_hours,
        strength,
        p_value,
        significance,
        confidence: stats::shrunk_confidence(significance, n, config.confidence_shrinkage),
        paired_samples: n as u32,
        input_baseline_id: None,
        output_baseline_id: None,
    })
}

/// Baseline id for a metric, or None when the metric has too little history.
fn baseline_ref(
    conn: &Connection,
    source: &dyn ObservationSource,
    child_id: &Uuid,
    metric: &str,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<Option<Uuid>, AnalysisError> {
    match ensure_baseline(conn, source, child_id, metric, now, config) {
        Ok(b) => Ok(Some(b.id)),
        Err(e @ AnalysisError::BaselineUnavailable { .. }) => {
            tracing::debug!(child_id = %child_id, metric, error = %e, "No baseline for metric");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Compute every factor pair of a request.
///
/// Pair-local failures become `Skipped` entries; anything else aborts.
pub fn compute_request(
    conn: &Connection,
    source: &dyn ObservationSource,
    request: &CorrelationRequest,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<CorrelationOutcome, AnalysisError> {
    let input_range = request
        .date_range
        .shifted_back(request.lag_hours)
        .filter(|_| (0..=config.max_lag_hours).contains(&request.lag_hours))
        .ok_or_else(|| {
            AnalysisError::InvalidInput(format!("unusable lag: {}h", request.lag_hours))
        })?;
    // One load covers every pair. Output days outside the requested range are
    // dropped during alignment.
    let all = source.all_series(conn, &request.child_id, &input_range)?;
    let series_of = |metric: &str| all.get(metric).map(Vec::as_slice).unwrap_or(&[]);
    let mut outcome = CorrelationOutcome::default();

    for (input, output) in request.factor_pairs() {
        let result = (|| {
            let mut pair = compute_pair(
                &input,
                &output,
                series_of(&input),
                series_of(&output),
                request.lag_hours,
                &request.date_range,
                config,
            )?;
            pair.input_baseline_id =
                baseline_ref(conn, source, &request.child_id, &input, now, config)?;
            pair.output_baseline_id =
                baseline_ref(conn, source, &request.child_id, &output, now, config)?;
            Ok::<_, AnalysisError>(pair)
        })();

        match result {
            Ok(pair) => {
                tracing::debug!(
                    request_id = %request.id,
                    input = %pair.input_factor,
                    output = %pair.output_factor,
                    strength = pair.strength,
                    significance = pair.significance,
                    n = pair.paired_samples,
                    "Pair correlated"
                );
                outcome.pairs.push(PairOutcome::Computed(pair));
            }
            Err(e) if e.is_pair_local() => {
                tracing::debug!(request_id = %request.id, %input, %output, error = %e, "Pair skipped");
                outcome.pairs.push(PairOutcome::Skipped {
                    input_factor: input,
                    output_factor: output,
                    reason: e.kind().to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(outcome)
}
