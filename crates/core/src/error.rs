use crate::analysis::AnalysisId;
use crate::status::AnalysisStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid status transition for analysis {id}: {from} -> {to}")]
    InvalidTransition {
        id: AnalysisId,
        from: AnalysisStatus,
        to: AnalysisStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),
}
