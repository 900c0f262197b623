//! In-process backend: each execution is a tokio task running a
//! [`SupportComputation`].

pub mod command;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phylo_core::{Analysis, Artifacts};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, BackendReport, BackendState, ComputeBackend, Execution};

/// Default interval between two polls of a local execution.
pub const DEFAULT_LOCAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Failure message of a computation that panicked or was aborted.
pub const ABORTED_MESSAGE: &str = "Local computation aborted";

// ---------------------------------------------------------------------------
// ProgressCounter
// ---------------------------------------------------------------------------

/// Shared, monotonic replicate counter written by a computation and read by
/// the engine.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter(Arc<AtomicU64>);

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise the counter to `value`. Lower values are ignored.
    pub fn advance_to(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// SupportComputation
// ---------------------------------------------------------------------------

/// The actual work run by a [`LocalBackend`].
///
/// Implementations must return promptly once `cancel` fires. Whatever they
/// return after cancellation is discarded.
#[async_trait]
pub trait SupportComputation: Send + Sync + 'static {
    async fn compute(
        &self,
        analysis: Analysis,
        progress: ProgressCounter,
        cancel: CancellationToken,
    ) -> Result<Artifacts, BackendError>;
}

// ---------------------------------------------------------------------------
// LocalBackend
// ---------------------------------------------------------------------------

pub struct LocalBackend<C> {
    computation: Arc<C>,
    poll_interval: Duration,
}

impl<C: SupportComputation> LocalBackend<C> {
    pub fn new(computation: C) -> Self {
        Self {
            computation: Arc::new(computation),
            poll_interval: DEFAULT_LOCAL_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl<C: SupportComputation> ComputeBackend for LocalBackend<C> {
    fn name(&self) -> &'static str {
        "local"
    }

    fn cpu_bound(&self) -> bool {
        true
    }

    async fn start(&self, analysis: &Analysis) -> Result<Box<dyn Execution>, BackendError> {
        let progress = ProgressCounter::new();
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let computation = Arc::clone(&self.computation);
        let job = analysis.clone();
        let task_progress = progress.clone();
        let task_cancel = cancel.clone();
        let analysis_id = analysis.id.clone();

        tokio::spawn(async move {
            // The computation runs in its own task so that a panic is
            // reported as a failure instead of leaving the outcome unset.
            let compute_cancel = task_cancel.clone();
            let joined = tokio::spawn(async move {
                computation.compute(job, task_progress, compute_cancel).await
            })
            .await;
            let state = if task_cancel.is_cancelled() {
                BackendState::Canceled
            } else {
                match joined {
                    Ok(Ok(artifacts)) => BackendState::Finished(artifacts),
                    Ok(Err(e)) => {
                        tracing::warn!(analysis_id = %analysis_id, error = %e, "Local computation failed");
                        BackendState::Failed(e.to_string())
                    }
                    Err(e) => {
                        tracing::error!(analysis_id = %analysis_id, error = %e, "Local computation aborted");
                        BackendState::Failed(format!("{ABORTED_MESSAGE}: {e}"))
                    }
                }
            };
            outcome_tx.send_replace(Some(state));
        });

        Ok(Box::new(LocalExecution {
            progress,
            reported: AtomicU64::new(0),
            cancel,
            outcome: outcome_rx,
            poll_interval: self.poll_interval,
        }))
    }
}

// ---------------------------------------------------------------------------
// LocalExecution
// ---------------------------------------------------------------------------

struct LocalExecution {
    progress: ProgressCounter,
    /// Progress value included in the last report.
    reported: AtomicU64,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<BackendState>>,
    poll_interval: Duration,
}

#[async_trait]
impl Execution for LocalExecution {
    fn remote_ref(&self) -> Option<&str> {
        None
    }

    async fn poll(&self) -> Result<BackendReport, BackendError> {
        let outcome = self.outcome.borrow().clone();
        let state = match outcome {
            Some(state) => state,
            // Sender gone without an outcome: the task itself died.
            None if self.outcome.has_changed().is_err() => {
                match self.outcome.borrow().clone() {
                    Some(state) => state,
                    None => BackendState::Failed(ABORTED_MESSAGE.to_string()),
                }
            }
            None => BackendState::Running,
        };
        let current = self.progress.get();
        let previous = self.reported.swap(current, Ordering::Relaxed);
        Ok(BackendReport {
            state,
            progress_delta: current.saturating_sub(previous),
        })
    }

    fn progress(&self) -> u64 {
        self.progress.get()
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        self.cancel.cancel();
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Drop for LocalExecution {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
