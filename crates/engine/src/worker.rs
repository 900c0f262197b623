//! Worker tasks: take one analysis at a time off the queue and drive it to
//! a terminal state.
//!
//! For each analysis: `Pending -> Running`, start the backend, then race
//! the timeout, the shutdown token and the supervision loop. The progress
//! task runs alongside and is joined before the outcome is recorded. The
//! outcome is recorded before the backend is stopped and released, so a
//! slow backend never delays the terminal state.

use std::sync::Arc;

use phylo_compute::{BackendState, Execution};
use phylo_core::AnalysisId;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    cancel_execution, release_execution, release_inputs, Outcome, Shared, SHUTDOWN_MESSAGE,
};
use crate::progress::report_progress;
use crate::registry::TrackedAnalysis;

pub(crate) type Queue = Arc<Mutex<mpsc::Receiver<Arc<TrackedAnalysis>>>>;

pub(crate) async fn run_worker(
    index: usize,
    shared: Arc<Shared>,
    queue: Queue,
    cancel: CancellationToken,
) {
    tracing::info!(worker = index, "Worker started");
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = async { queue.lock().await.recv().await } => next,
        };
        let Some(tracked) = next else {
            break;
        };
        process(index, &shared, tracked).await;
    }
    tracing::info!(worker = index, "Worker stopped");
}

async fn process(index: usize, shared: &Arc<Shared>, tracked: Arc<TrackedAnalysis>) {
    let analysis = {
        let mut job = tracked.lock().await;
        if job.is_terminal() {
            // Canceled while queued.
            return;
        }
        if let Err(e) = job.start(shared.clock.now()) {
            tracing::error!(analysis_id = %job.id, error = %e, "Cannot start analysis");
            return;
        }
        shared.persist(&job).await;
        shared.publish(&job);
        job.clone()
    };
    tracing::info!(worker = index, analysis_id = %analysis.id, "Analysis started");

    let end = run(shared, &tracked).await;
    let ended = shared.finalize(&tracked, end.outcome).await;
    shared.registry.remove(&analysis.id).await;
    if let Some(job) = &ended {
        shared.notify(job).await;
    }

    if let Some(execution) = end.execution {
        if end.interrupted {
            stop(&tracked).await;
        }
        release_execution(&analysis.id, execution.as_ref()).await;
    }
    release_inputs(&analysis).await;
}

/// How a run ended and what is left to clean up on the backend.
struct RunEnd {
    outcome: Outcome,
    /// `None` when the backend never started.
    execution: Option<Arc<dyn Execution>>,
    /// The run was cut short and the backend must be asked to stop.
    interrupted: bool,
}

async fn run(shared: &Arc<Shared>, tracked: &Arc<TrackedAnalysis>) -> RunEnd {
    let analysis = tracked.snapshot().await;
    let execution: Arc<dyn Execution> = match shared.backend.start(&analysis).await {
        Ok(execution) => Arc::from(execution),
        Err(e) => {
            tracing::warn!(analysis_id = %analysis.id, error = %e, "Backend failed to start");
            return RunEnd {
                outcome: Outcome::Failed(e.to_string()),
                execution: None,
                interrupted: false,
            };
        }
    };
    tracked.attach(Arc::clone(&execution)).await;

    if let Some(remote_ref) = execution.remote_ref() {
        let mut job = tracked.lock().await;
        if !job.is_terminal() {
            job.remote_ref = Some(remote_ref.to_string());
            shared.persist(&job).await;
        }
    }

    let (done_tx, done_rx) = oneshot::channel();
    let reporter = tokio::spawn(report_progress(
        Arc::clone(shared),
        Arc::clone(tracked),
        Arc::clone(&execution),
        shared.config.progress_interval,
        done_rx,
    ));

    let deadline = shared.config.timeout.map(|t| tracked.registered_at() + t);
    let (outcome, interrupted) = tokio::select! {
        biased;
        _ = sleep_until(deadline) => {
            tracing::warn!(analysis_id = %analysis.id, "Analysis timed out");
            (Outcome::TimedOut, true)
        }
        _ = tracked.cancel_token().cancelled() => {
            (Outcome::Canceled(SHUTDOWN_MESSAGE.to_string()), true)
        }
        outcome = supervise(shared, &analysis.id, execution.as_ref()) => {
            (apply_deadline(outcome, deadline, Instant::now()), false)
        }
    };

    let _ = done_tx.send(());
    if let Err(e) = reporter.await {
        tracing::warn!(analysis_id = %analysis.id, error = %e, "Progress task failed");
    }

    RunEnd {
        outcome,
        execution: Some(execution),
        interrupted,
    }
}

/// An outcome the backend reported at or after the deadline still counts
/// as a timeout. `observed` is when supervision returned it.
fn apply_deadline(outcome: Outcome, deadline: Option<Instant>, observed: Instant) -> Outcome {
    match (deadline, outcome) {
        (Some(deadline), Outcome::Finished(_) | Outcome::Failed(_)) if observed >= deadline => {
            Outcome::TimedOut
        }
        (_, outcome) => outcome,
    }
}

async fn stop(tracked: &TrackedAnalysis) {
    if let Some(execution) = tracked.take_execution().await {
        cancel_execution(tracked.id(), execution.as_ref()).await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Poll `execution` on its own interval until it reports a terminal state.
async fn supervise(shared: &Shared, id: &AnalysisId, execution: &dyn Execution) -> Outcome {
    let max_failures = shared.config.max_poll_failures;
    let mut failures: u32 = 0;
    loop {
        match execution.poll().await {
            Ok(report) => {
                failures = 0;
                if report.progress_delta > 0 {
                    tracing::trace!(analysis_id = %id, delta = report.progress_delta, "Replicates processed");
                }
                match report.state {
                    BackendState::Queued | BackendState::Running => {}
                    BackendState::Finished(artifacts) => return Outcome::Finished(artifacts),
                    BackendState::Failed(message) => return Outcome::Failed(message),
                    BackendState::Canceled => {
                        return Outcome::Canceled("Canceled by the computing backend".to_string())
                    }
                    BackendState::Unknown(state) => {
                        tracing::error!(analysis_id = %id, state = %state, "Unknown backend state");
                        return Outcome::Failed(format!("Unknown backend state: {state}"));
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    analysis_id = %id,
                    error = %e,
                    failures,
                    "Backend status check failed",
                );
                if max_failures > 0 && failures >= max_failures {
                    return Outcome::Failed(format!(
                        "Backend unreachable after {failures} status checks: {e}"
                    ));
                }
            }
        }
        tokio::time::sleep(execution.poll_interval()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use phylo_core::Artifacts;

    use super::*;

    #[test]
    fn outcome_reached_before_the_deadline_is_kept() {
        let deadline = Instant::now() + Duration::from_secs(10);
        let observed = deadline - Duration::from_secs(1);

        assert_matches!(
            apply_deadline(Outcome::Finished(Artifacts::new()), Some(deadline), observed),
            Outcome::Finished(_)
        );
        assert_matches!(
            apply_deadline(Outcome::Failed("x".into()), Some(deadline), observed),
            Outcome::Failed(_)
        );
    }

    #[test]
    fn outcome_reached_at_or_after_the_deadline_times_out() {
        let deadline = Instant::now() + Duration::from_secs(10);

        assert_matches!(
            apply_deadline(Outcome::Finished(Artifacts::new()), Some(deadline), deadline),
            Outcome::TimedOut
        );
        assert_matches!(
            apply_deadline(
                Outcome::Failed("x".into()),
                Some(deadline),
                deadline + Duration::from_secs(1)
            ),
            Outcome::TimedOut
        );
    }

    #[test]
    fn cancellation_and_unbounded_runs_are_untouched() {
        let now = Instant::now();
        assert_matches!(
            apply_deadline(Outcome::Canceled("c".into()), Some(now), now),
            Outcome::Canceled(_)
        );
        assert_matches!(
            apply_deadline(Outcome::Finished(Artifacts::new()), None, now),
            Outcome::Finished(_)
        );
    }
}
