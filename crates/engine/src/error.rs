use phylo_core::{AnalysisId, AnalysisStatus};
use phylo_db::StoreError;

use crate::config::ConfigError;

/// Errors returned by the engine to its callers.
///
/// Per-analysis failures (backend errors, timeouts) never surface here;
/// they end the analysis in a terminal status instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The analysis was rejected and stored as `Canceled`.
    #[error("Computing queue is full, analysis {id} was canceled")]
    QueueFull { id: AnalysisId },

    /// The engine is stopping; the analysis was stored as `Canceled`.
    #[error("Server is stopping, analysis {id} was canceled")]
    ShuttingDown { id: AnalysisId },

    #[error("Analysis {id} cannot be submitted: {reason}")]
    InvalidSubmission {
        id: AnalysisId,
        status: AnalysisStatus,
        reason: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
