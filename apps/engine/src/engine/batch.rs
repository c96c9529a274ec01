use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ApplicationEngine, JobOutcome};

/// What a batch run did, in submission order.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<JobOutcome>,
    /// Jobs left untouched, with the reason.
    pub skipped: Vec<(String, String)>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Jobs per final status.
    pub fn totals(&self) -> BTreeMap<&'static str, usize> {
        let mut totals = BTreeMap::new();
        for outcome in &self.outcomes {
            *totals.entry(outcome.status.as_str()).or_insert(0) += 1;
        }
        totals
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Processed {} job(s)", self.outcomes.len());
        for outcome in &self.outcomes {
            let _ = writeln!(
                out,
                "  {:<24} {:<36} {}",
                outcome.job_id, outcome.status, outcome.reason
            );
        }
        for (id, reason) in &self.skipped {
            let _ = writeln!(out, "  {id:<24} skipped: {reason}");
        }
        for (status, count) in self.totals() {
            let _ = writeln!(out, "{status}: {count}");
        }
        if self.cancelled {
            let _ = writeln!(out, "Run cancelled before all jobs were started");
        }
        out
    }
}

/// Runs a list of jobs through one engine, each on its own task.
///
/// With one worker jobs run strictly in order. A panic in one job is recorded
/// as `error_unknown` for that job and the run continues.
pub struct BatchRunner {
    engine: Arc<ApplicationEngine>,
    workers: usize,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(engine: Arc<ApplicationEngine>, workers: usize, cancel: CancellationToken) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            cancel,
        }
    }

    pub async fn run(&self, job_ids: Vec<String>) -> RunSummary {
        let mut summary = RunSummary::default();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut running = Vec::new();

        info!("Starting batch of {} job(s) with {} worker(s)", job_ids.len(), self.workers);

        for job_id in job_ids {
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => permit,
                _ = self.cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
            };
            let Ok(permit) = permit else {
                break;
            };
            // Checked again: cancellation may land while the last job finishes.
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let engine = self.engine.clone();
            let id = job_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                engine.apply(&id).await
            });
            running.push((job_id, handle));
        }

        if summary.cancelled {
            warn!("Cancellation requested; waiting for started jobs to finish");
        }

        for (job_id, handle) in running {
            match handle.await {
                Ok(Ok(outcome)) => summary.outcomes.push(outcome),
                Ok(Err(e)) => {
                    warn!("[{job_id}] Skipped: {e}");
                    summary.skipped.push((job_id, e.to_string()));
                }
                Err(join_error) => {
                    let message = panic_message(join_error);
                    error!("[{job_id}] Job task panicked: {message}");
                    summary
                        .outcomes
                        .push(self.engine.record_panic(&job_id, message).await);
                }
            }
        }

        info!(
            "Batch finished: {} processed, {} skipped",
            summary.outcomes.len(),
            summary.skipped.len()
        );
        summary
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
