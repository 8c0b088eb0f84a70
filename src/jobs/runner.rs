//! One correlation job, start to finish.
//!
//! claim → compute → (complete + pattern/insight upserts + pattern ids) in a
//! single IMMEDIATE transaction. Completion is conditional on still holding
//! the claim, so a run that was reclaimed by the sweep leaves no trace.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::correlation::compute_request;
use crate::analysis::patterns::apply_correlation_result;
use crate::analysis::source::ObservationSource;
use crate::analysis::AnalysisError;
use crate::config::EngineConfig;
use crate::db::{repository, DatabaseError};
use crate::models::enums::RequestStatus;
use crate::models::{CorrelationOutcome, CorrelationRequest, PairOutcome};

/// What a run left behind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub computed_pairs: usize,
    pub skipped_pairs: usize,
    /// Patterns created or confirmed by this run.
    pub pattern_ids: Vec<Uuid>,
    /// Insights created or refreshed by this run.
    pub insight_ids: Vec<Uuid>,
    /// Pairs whose result retired an existing pattern.
    pub contradictions: usize,
    pub error_kind: Option<String>,
}

impl RunSummary {
    fn failed(request_id: Uuid, outcome: Option<&CorrelationOutcome>, kind: &str) -> Self {
        Self {
            request_id,
            status: RequestStatus::Failed,
            computed_pairs: 0,
            skipped_pairs: outcome.map(|o| o.pairs.len()).unwrap_or(0),
            pattern_ids: Vec::new(),
            insight_ids: Vec::new(),
            contradictions: 0,
            error_kind: Some(kind.to_string()),
        }
    }
}

/// Mark the request failed. A lost claim becomes `JobTimeout`.
fn fail(
    conn: &Connection,
    request: &CorrelationRequest,
    worker: &str,
    kind: &str,
    detail: &str,
    now: NaiveDateTime,
) -> Result<(), AnalysisError> {
    if !repository::fail_request(conn, &request.id, worker, kind, detail, now)? {
        return Err(AnalysisError::JobTimeout(request.id.to_string()));
    }
    tracing::warn!(request_id = %request.id, error_kind = kind, "Correlation request failed");
    Ok(())
}

/// Run a pending correlation request as `worker`.
///
/// Completes when at least one pair produced a result, otherwise fails with
/// the first pair's error kind. A store error fails the request with its
/// message kept for operators.
pub fn run_correlation(
    conn: &Connection,
    source: &dyn ObservationSource,
    request_id: &Uuid,
    worker: &str,
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<RunSummary, AnalysisError> {
    let request =
        repository::get_correlation_request(conn, request_id).map_err(AnalysisError::from_store)?;
    if request.status.is_terminal() {
        return Err(AnalysisError::AlreadyFinished {
            id: request_id.to_string(),
            status: request.status.to_string(),
        });
    }
    if !repository::claim_request(conn, request_id, worker, now)? {
        return Err(AnalysisError::JobClaimConflict(request_id.to_string()));
    }
    tracing::info!(request_id = %request_id, worker, pairs = request.factor_pairs().len(), "Correlation request claimed");

    let outcome = match compute_request(conn, source, &request, now, config) {
        Ok(outcome) => outcome,
        Err(e) => {
            fail(conn, &request, worker, e.kind(), &e.to_string(), now)?;
            return Ok(RunSummary::failed(request.id, None, e.kind()));
        }
    };

    let computed: Vec<_> = outcome.computed().cloned().collect();
    if computed.is_empty() {
        let kind = outcome
            .pairs
            .iter()
            .find_map(|p| match p {
                PairOutcome::Skipped { reason, .. } => Some(reason.as_str()),
                PairOutcome::Computed(_) => None,
            })
            .unwrap_or("insufficient_paired_data");
        fail(conn, &request, worker, kind, "no factor pair could be correlated", now)?;
        return Ok(RunSummary::failed(request.id, Some(&outcome), kind));
    }

    match persist(conn, &request, worker, &outcome, &computed, now, config) {
        Ok(summary) => Ok(summary),
        Err(AnalysisError::Store(e)) => {
            let err = AnalysisError::Store(e);
            fail(conn, &request, worker, err.kind(), &err.to_string(), now)?;
            Ok(RunSummary::failed(request.id, Some(&outcome), err.kind()))
        }
        Err(e) => Err(e),
    }
}

fn persist(
    conn: &Connection,
    request: &CorrelationRequest,
    worker: &str,
    outcome: &CorrelationOutcome,
    computed: &[crate::models::FactorCorrelation],
    now: NaiveDateTime,
    config: &EngineConfig,
) -> Result<RunSummary, AnalysisError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(DatabaseError::from)?;

    if !repository::complete_request(&tx, &request.id, worker, outcome, now)? {
        // Dropping the transaction rolls it back; the result is discarded.
        tracing::warn!(request_id = %request.id, worker, "Claim lost before completion");
        return Err(AnalysisError::JobTimeout(request.id.to_string()));
    }

    let mut pattern_ids = Vec::new();
    let mut insight_ids = Vec::new();
    let mut contradictions = 0;
    for result in computed {
        let (merge, insight) = apply_correlation_result(
            &tx,
            &request.child_id,
            Some(request.id),
            result,
            Some(request.date_range),
            now,
            config,
        )?;
        tracing::debug!(
            request_id = %request.id,
            input = %result.input_factor,
            output = %result.output_factor,
            merge = merge.label(),
            "Pattern merge applied"
        );
        if let Some(p) = merge.active_pattern() {
            if !pattern_ids.contains(&p.id) {
                pattern_ids.push(p.id);
            }
        }
        if matches!(merge, crate::analysis::patterns::MergeOutcome::Contradicted { .. }) {
            contradictions += 1;
        }
        if let Some(i) = insight {
            insight_ids.push(i.id);
        }
    }
    repository::set_request_pattern_ids(&tx, &request.id, &pattern_ids)?;
    tx.commit().map_err(DatabaseError::from)?;

    tracing::info!(
        request_id = %request.id,
        computed = computed.len(),
        patterns = pattern_ids.len(),
        "Correlation request completed"
    );

    Ok(RunSummary {
        request_id: request.id,
        status: RequestStatus::Completed,
        computed_pairs: computed.len(),
        skipped_pairs: outcome.pairs.len() - computed.len(),
        pattern_ids,
        insight_ids,
        contradictions,
        error_kind: None,
    })
}
