//! Row model for the `analyses` table.

use phylo_core::status::StatusCode;
use phylo_core::{Analysis, AnalysisId, AnalysisStatus, Timestamp};
use sqlx::FromRow;

use crate::store::StoreError;

/// A row from the `analyses` table.
///
/// Structured fields (`inputs`, `notification`, `artifacts`) are stored
/// as JSONB.
#[derive(Debug, Clone, FromRow)]
pub struct AnalysisRow {
    pub id: String,
    pub status: StatusCode,
    pub message: String,
    pub progress: i64,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub inputs: serde_json::Value,
    pub notification: serde_json::Value,
    pub remote_ref: Option<String>,
    pub artifacts: serde_json::Value,
}

impl AnalysisRow {
    /// Flatten a domain record into column values.
    pub fn from_analysis(analysis: &Analysis) -> Result<Self, StoreError> {
        let corrupt = |e: serde_json::Error| StoreError::Corrupt {
            id: analysis.id.to_string(),
            reason: e.to_string(),
        };
        Ok(Self {
            id: analysis.id.to_string(),
            status: analysis.status.code(),
            message: analysis.message.clone(),
            progress: i64::try_from(analysis.progress).unwrap_or(i64::MAX),
            submitted_at: analysis.submitted_at,
            started_at: analysis.started_at,
            ended_at: analysis.ended_at,
            inputs: serde_json::to_value(&analysis.inputs).map_err(corrupt)?,
            notification: serde_json::to_value(&analysis.notification).map_err(corrupt)?,
            remote_ref: analysis.remote_ref.clone(),
            artifacts: serde_json::to_value(&analysis.artifacts).map_err(corrupt)?,
        })
    }

    /// Rebuild the domain record, rejecting unknown status codes.
    pub fn into_analysis(self) -> Result<Analysis, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };

        let status = match AnalysisStatus::from_code(self.status) {
            Some(AnalysisStatus::NotExists) | None => {
                return Err(corrupt(format!("unknown status code {}", self.status)))
            }
            Some(status) => status,
        };

        Ok(Analysis {
            id: AnalysisId::new(id.clone()),
            status,
            message: self.message,
            progress: u64::try_from(self.progress).unwrap_or(0),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            inputs: serde_json::from_value(self.inputs).map_err(|e| corrupt(e.to_string()))?,
            notification: serde_json::from_value(self.notification)
                .map_err(|e| corrupt(e.to_string()))?,
            remote_ref: self.remote_ref,
            artifacts: serde_json::from_value(self.artifacts)
                .map_err(|e| corrupt(e.to_string()))?,
        })
    }
}
