//! Bounded-parallelism driver for per-file jobs
//!
//! `workers` jobs run at once; each completion admits the next file from the
//! queue. Two cancellation paths: a run-level token (Ctrl-C) checked before a
//! job is admitted and at safe points inside orchestrators, and break-on-fail,
//! which cancels every not-yet-admitted file after the first terminal failure.
//! In-flight jobs are never cancelled forcibly; their network calls complete
//! or fail on their own timeouts.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ledger::Ledger;

/// Per-job terminal error, carrying the stage for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The worker observed the run-level cancellation at a safe point.
    Cancelled { message: String },
    /// The stage named in `stage` failed; the file is done for this run.
    Failed { stage: String, message: String },
}

impl JobError {
    pub fn failed(stage: &str, message: impl std::fmt::Display) -> Self {
        Self::Failed {
            stage: stage.to_string(),
            message: message.to_string(),
        }
    }

    pub fn interrupted() -> Self {
        Self::Cancelled {
            message: "KeyboardInterrupt".to_string(),
        }
    }
}

/// Counts for the end-of-run summary line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub delivered: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Drive `jobs` (name → job future factory results) to completion.
///
/// Every name must already be registered in the ledger. `on_complete` fires
/// once per finished file (any outcome) for the summary progress counter.
pub async fn run_pool<Fut>(
    jobs: Vec<(String, Fut)>,
    workers: usize,
    break_on_fail: bool,
    cancel: CancellationToken,
    ledger: Arc<Ledger>,
    mut on_complete: impl FnMut(&str),
) -> PoolSummary
where
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    let workers = workers.max(1);
    let total = jobs.len();
    let mut queue: VecDeque<(String, Fut)> = jobs.into();
    let mut running: JoinSet<Result<(), JobError>> = JoinSet::new();
    // Names live outside the tasks so a panicked worker can still be
    // attributed and recorded in the ledger.
    let mut names: HashMap<tokio::task::Id, String> = HashMap::new();
    let mut summary = PoolSummary::default();
    // Set once break-on-fail trips; names the triggering file.
    let mut abort_reason: Option<String> = None;

    info!(files = total, workers, break_on_fail, "dispatching transfer pool");

    loop {
        // Admit jobs up to the worker bound, unless the run is winding down.
        while running.len() < workers && abort_reason.is_none() && !cancel.is_cancelled() {
            let Some((name, fut)) = queue.pop_front() else {
                break;
            };
            if !ledger.try_start(&name) {
                // Cancelled before admission (or duplicate); count and move on.
                summary.cancelled += 1;
                on_complete(&name);
                continue;
            }
            let handle = running.spawn(fut);
            names.insert(handle.id(), name);
        }

        let Some(joined) = running.join_next_with_id().await else {
            break;
        };

        let (name, result) = match joined {
            Ok((id, result)) => {
                let Some(name) = names.remove(&id) else {
                    continue;
                };
                (name, result)
            }
            Err(join_err) => {
                let Some(name) = names.remove(&join_err.id()) else {
                    warn!(error = %join_err, "transfer worker panicked");
                    summary.failed += 1;
                    continue;
                };
                (
                    name,
                    Err(JobError::failed("panic", format!("worker panicked: {join_err}"))),
                )
            }
        };

        match result {
            Ok(()) => {
                ledger.finish(&name);
                summary.delivered += 1;
            }
            Err(JobError::Cancelled { message }) => {
                ledger.cancel(&name, &message);
                summary.cancelled += 1;
            }
            Err(JobError::Failed { stage, message }) => {
                ledger.fail(&name, &stage, &message);
                warn!(file = %name, stage = %stage, message = %message, "file failed");
                summary.failed += 1;
                if break_on_fail && abort_reason.is_none() {
                    abort_reason = Some(name.clone());
                }
            }
        }
        on_complete(&name);
    }

    // Whatever never got admitted is cancelled in place.
    let leftover_message = if let Some(trigger) = &abort_reason {
        format!("Cancelled: break-on-fail after failure of '{trigger}'")
    } else if cancel.is_cancelled() {
        "KeyboardInterrupt".to_string()
    } else {
        String::new()
    };
    for (name, _) in queue {
        ledger.cancel(&name, &leftover_message);
        summary.cancelled += 1;
        on_complete(&name);
    }

    info!(
        delivered = summary.delivered,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "transfer pool drained"
    );
    summary
}
