//! End-of-analysis notification contract.

use async_trait::async_trait;
use phylo_core::{AnalysisId, AnalysisStatus, NotificationTarget};

/// Error type for notification delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

/// Tells the submitter that an analysis reached a terminal state.
///
/// Callers log failures and move on; notifications are never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        status: AnalysisStatus,
        id: &AnalysisId,
        target: &NotificationTarget,
    ) -> Result<(), NotifyError>;
}

/// Notifier that does nothing. Used when no delivery channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(
        &self,
        _status: AnalysisStatus,
        _id: &AnalysisId,
        _target: &NotificationTarget,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}
