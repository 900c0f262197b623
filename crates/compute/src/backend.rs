//! The contract between the orchestration engine and whatever actually
//! computes branch supports.
//!
//! A [`ComputeBackend`] turns an [`Analysis`] into a running
//! [`Execution`]. The engine then polls the execution on its own
//! [`poll_interval`](Execution::poll_interval) until a terminal
//! [`BackendState`] is reported, reads [`progress`](Execution::progress)
//! from a separate task, and calls [`cancel`](Execution::cancel) on timeout
//! or shutdown. Once the outcome is recorded it calls
//! [`release`](Execution::release). The engine never branches on the
//! concrete backend.

use std::time::Duration;

use async_trait::async_trait;
use phylo_core::{Analysis, Artifacts};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors raised while talking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The computation could not be started.
    #[error("Launch failed: {0}")]
    Launch(String),

    /// The backend refused the analysis before starting it. The message is
    /// meant for the submitter.
    #[error("{0}")]
    Rejected(String),

    /// A status check failed. The engine retries these.
    #[error("Status check failed: {0}")]
    Poll(String),

    #[error("Cancellation failed: {0}")]
    Cancel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote system returned a non-2xx status code.
    #[error("Remote API error ({status}): {body}")]
    Api { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// State of an execution as seen by its backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendState {
    /// Accepted but not started yet (remote queue).
    Queued,
    Running,
    Finished(Artifacts),
    Failed(String),
    Canceled,
    /// A state string the backend does not recognise.
    Unknown(String),
}

impl BackendState {
    /// Whether the execution will not change state anymore.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

/// Result of one [`Execution::poll`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReport {
    pub state: BackendState,
    /// Replicates processed since the previous poll.
    pub progress_delta: u64,
}

impl BackendReport {
    pub fn new(state: BackendState) -> Self {
        Self {
            state,
            progress_delta: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Something that can start support computations.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether executions consume local CPUs. The engine validates its
    /// worker count against the host only for CPU-bound backends.
    fn cpu_bound(&self) -> bool;

    async fn start(&self, analysis: &Analysis) -> Result<Box<dyn Execution>, BackendError>;
}

/// Handle on one started computation.
#[async_trait]
pub trait Execution: Send + Sync {
    /// Identifier on the remote system, if the work was delegated.
    fn remote_ref(&self) -> Option<&str>;

    async fn poll(&self) -> Result<BackendReport, BackendError>;

    /// Monotonic count of processed replicates.
    fn progress(&self) -> u64;

    /// Ask the backend to stop. Best-effort; may be called more than once.
    async fn cancel(&self) -> Result<(), BackendError>;

    /// Free what the backend keeps for this execution once its outcome is
    /// recorded (remote histories, uploaded inputs). Called once per
    /// started execution, after any `cancel`.
    async fn release(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn poll_interval(&self) -> Duration;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_queued_and_running_are_non_terminal() {
        assert!(!BackendState::Queued.is_terminal());
        assert!(!BackendState::Running.is_terminal());
        assert!(BackendState::Finished(Artifacts::new()).is_terminal());
        assert!(BackendState::Failed("x".into()).is_terminal());
        assert!(BackendState::Canceled.is_terminal());
        assert!(BackendState::Unknown("paused".into()).is_terminal());
    }

    #[test]
    fn api_error_display() {
        let err = BackendError::Api {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.to_string(), "Remote API error (503): busy");
    }
}
