//! The persistence contract consumed by the orchestration engine.

use async_trait::async_trait;
use phylo_core::{Analysis, AnalysisId, AnalysisStatus};
use serde::Serialize;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("Analysis does not exist: {0}")]
    NotFound(AnalysisId),

    /// The underlying database failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be decoded.
    #[error("Corrupt analysis record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Durable get/put of analysis records.
///
/// Implementations must tolerate concurrent `put` calls for different ids.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Fetch one analysis, or [`StoreError::NotFound`].
    async fn get(&self, id: &AnalysisId) -> Result<Analysis, StoreError>;

    /// Insert or replace an analysis.
    async fn put(&self, analysis: &Analysis) -> Result<(), StoreError>;

    /// All analyses still `Pending` or `Running`, used for restart recovery.
    async fn list_unfinished(&self) -> Result<Vec<Analysis>, StoreError>;

    /// Delete terminal analyses that ended more than `age` ago.
    ///
    /// Returns the number of deleted records.
    async fn delete_older_than(&self, age: chrono::Duration) -> Result<u64, StoreError>;

    /// Number of stored analyses per status.
    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;
}

/// Per-status totals over the stored analyses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub finished: u64,
    pub error: u64,
    pub canceled: u64,
    pub timed_out: u64,
}

impl StatusCounts {
    /// Add `n` analyses with the given status.
    pub fn add(&mut self, status: AnalysisStatus, n: u64) {
        match status {
            AnalysisStatus::Pending => self.pending += n,
            AnalysisStatus::Running => self.running += n,
            AnalysisStatus::Finished => self.finished += n,
            AnalysisStatus::Error => self.error += n,
            AnalysisStatus::Canceled => self.canceled += n,
            AnalysisStatus::TimedOut => self.timed_out += n,
            AnalysisStatus::NotExists => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.finished + self.error + self.canceled + self.timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_ignore_not_exists() {
        let mut counts = StatusCounts::default();
        counts.add(AnalysisStatus::Finished, 3);
        counts.add(AnalysisStatus::TimedOut, 1);
        counts.add(AnalysisStatus::NotExists, 9);
        assert_eq!(counts.finished, 3);
        assert_eq!(counts.timed_out, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn not_found_message_names_the_id() {
        let err = StoreError::NotFound(AnalysisId::new("abc"));
        assert_eq!(err.to_string(), "Analysis does not exist: abc");
    }
}
