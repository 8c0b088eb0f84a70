//! Background engine loops: correlation workers, the stale-job sweep and the
//! interrogative prompt scheduler.
//!
//! Each loop is a tokio task that does its database work on the blocking
//! pool with a connection of its own. All loops stop at the next check of a
//! shared shutdown flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::analysis::interrogative::promote_due_prompts;
use crate::analysis::AnalysisError;
use crate::core_state::CoreState;
use crate::db::repository;
use crate::models::enums::RequestStatus;

use super::runner::run_correlation;
use super::sweep::sweep_stale_jobs;
use super::utc_now;

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(100);

/// Handle for the running engine loops.
///
/// Dropping the handle requests shutdown; `shutdown().await` also waits for
/// every loop to finish its current step.
pub struct EngineHandle {
    shutdown: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Request shutdown without waiting.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub async fn shutdown(mut self) {
        self.request_shutdown();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Engine task ended abnormally");
            }
        }
        tracing::info!("Engine stopped");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

/// Start `worker_count` correlation workers plus the sweep and prompt loops.
/// Must be called from within a tokio runtime.
pub fn start_engine(state: Arc<CoreState>) -> EngineHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let config = state.config();
    let mut tasks = Vec::with_capacity(config.worker_count + 2);

    for n in 0..config.worker_count {
        let worker = format!("worker-{}-{n}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        tasks.push(tokio::spawn(worker_loop(state.clone(), shutdown.clone(), worker)));
    }
    tasks.push(tokio::spawn(sweep_loop(state.clone(), shutdown.clone())));
    tasks.push(tokio::spawn(prompt_loop(state.clone(), shutdown.clone())));

    tracing::info!(workers = config.worker_count, "Engine started");
    EngineHandle { shutdown, tasks }
}

/// Sleep for `total`, waking early on shutdown. Returns false on shutdown.
async fn pause(shutdown: &AtomicBool, total: Duration) -> bool {
    let mut slept = Duration::ZERO;
    while slept < total {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let step = SLEEP_GRANULARITY.min(total - slept);
        tokio::time::sleep(step).await;
        slept += step;
    }
    !shutdown.load(Ordering::Relaxed)
}

// ═══════════════════════════════════════════════════════════
// Correlation workers
// ═══════════════════════════════════════════════════════════

/// Try the oldest pending requests until one is run. Returns whether any
/// request was handled, so the caller knows whether to wait before polling.
fn work_once(state: &CoreState, worker: &str) -> Result<bool, crate::core_state::CoreError> {
    let conn = state.open_db()?;
    let config = state.config();
    let candidates = repository::list_pending_request_ids(&conn, (config.worker_count * 2) as u32)?;

    for id in candidates {
        match run_correlation(&conn, state.source(), &id, worker, utc_now(), &config) {
            Ok(summary) => {
                tracing::debug!(request_id = %id, status = %summary.status, "Worker finished request");
                return Ok(true);
            }
            // Another worker got it first.
            Err(AnalysisError::JobClaimConflict(_)) | Err(AnalysisError::AlreadyFinished { .. }) => {
                continue;
            }
            Err(e @ AnalysisError::JobTimeout(_)) => {
                tracing::warn!(request_id = %id, worker, error = %e, "Result discarded");
                return Ok(true);
            }
            Err(e) => {
                tracing::error!(request_id = %id, worker, error = %e, "Correlation run aborted");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

async fn worker_loop(state: Arc<CoreState>, shutdown: Arc<AtomicBool>, worker: String) {
    tracing::debug!(worker = %worker, "Correlation worker started");
    while !shutdown.load(Ordering::Relaxed) {
        let st = state.clone();
        let name = worker.clone();
        let handled = match tokio::task::spawn_blocking(move || work_once(&st, &name)).await {
            Ok(Ok(handled)) => handled,
            Ok(Err(e)) => {
                tracing::error!(worker = %worker, error = %e, "Worker could not reach the database");
                false
            }
            Err(e) => {
                tracing::error!(worker = %worker, error = %e, "Worker step panicked");
                false
            }
        };
        if !handled {
            let poll = Duration::from_millis(state.config().poll_interval_ms);
            if !pause(&shutdown, poll).await {
                break;
            }
        }
    }
    tracing::debug!(worker = %worker, "Correlation worker stopped");
}

// ═══════════════════════════════════════════════════════════
// Sweep and prompts
// ═══════════════════════════════════════════════════════════

async fn sweep_loop(state: Arc<CoreState>, shutdown: Arc<AtomicBool>) {
    loop {
        let st = state.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<usize, String> {
            let conn = st.open_db().map_err(|e| e.to_string())?;
            let timeout = chrono::Duration::seconds(st.config().job_timeout_secs);
            let reclaimed = sweep_stale_jobs(&conn, utc_now(), timeout).map_err(|e| e.to_string())?;
            let counts = repository::count_requests_by_status(&conn).map_err(|e| e.to_string())?;
            tracing::debug!(
                pending = counts.get(&RequestStatus::Pending).copied().unwrap_or(0),
                processing = counts.get(&RequestStatus::Processing).copied().unwrap_or(0),
                failed = counts.get(&RequestStatus::Failed).copied().unwrap_or(0),
                "Correlation queue"
            );
            Ok(reclaimed.len())
        })
        .await;
        match result {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => tracing::info!(reclaimed = n, "Sweep reclaimed stale requests"),
            Ok(Err(e)) => tracing::error!(error = %e, "Sweep failed"),
            Err(e) => tracing::error!(error = %e, "Sweep panicked"),
        }

        let interval = Duration::from_secs(state.config().sweep_interval_secs);
        if !pause(&shutdown, interval).await {
            break;
        }
    }
}

async fn prompt_loop(state: Arc<CoreState>, shutdown: Arc<AtomicBool>) {
    loop {
        let st = state.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<usize, String> {
            let conn = st.open_db().map_err(|e| e.to_string())?;
            promote_due_prompts(&conn, utc_now())
                .map(|ids| ids.len())
                .map_err(|e| e.to_string())
        })
        .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Prompt scheduling failed"),
            Err(e) => tracing::error!(error = %e, "Prompt scheduling panicked"),
        }

        let interval = Duration::from_secs(state.config().prompt_interval_secs);
        if !pause(&shutdown, interval).await {
            break;
        }
    }
}
