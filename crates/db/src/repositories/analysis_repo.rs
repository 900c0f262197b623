//! Repository for the `analyses` table.

use chrono::Utc;
use phylo_core::status::StatusCode;
use phylo_core::AnalysisStatus;
use sqlx::PgPool;

use crate::models::AnalysisRow;
use crate::store::StatusCounts;

/// Column list for `analyses` queries.
const COLUMNS: &str = "\
    id, status, message, progress, \
    submitted_at, started_at, ended_at, \
    inputs, notification, remote_ref, artifacts";

/// Provides CRUD operations for analyses.
pub struct AnalysisRepo;

impl AnalysisRepo {
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<AnalysisRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analyses WHERE id = $1");
        sqlx::query_as::<_, AnalysisRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Insert the row, or overwrite every mutable column if it exists.
    pub async fn upsert(pool: &PgPool, row: &AnalysisRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO analyses \
                 (id, status, message, progress, submitted_at, started_at, ended_at, \
                  inputs, notification, remote_ref, artifacts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 message = EXCLUDED.message, \
                 progress = EXCLUDED.progress, \
                 started_at = EXCLUDED.started_at, \
                 ended_at = EXCLUDED.ended_at, \
                 inputs = EXCLUDED.inputs, \
                 notification = EXCLUDED.notification, \
                 remote_ref = EXCLUDED.remote_ref, \
                 artifacts = EXCLUDED.artifacts",
        )
        .bind(&row.id)
        .bind(row.status)
        .bind(&row.message)
        .bind(row.progress)
        .bind(row.submitted_at)
        .bind(row.started_at)
        .bind(row.ended_at)
        .bind(&row.inputs)
        .bind(&row.notification)
        .bind(&row.remote_ref)
        .bind(&row.artifacts)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All pending or running analyses, oldest first.
    pub async fn list_unfinished(pool: &PgPool) -> Result<Vec<AnalysisRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM analyses \
             WHERE status IN ($1, $2) \
             ORDER BY submitted_at ASC"
        );
        sqlx::query_as::<_, AnalysisRow>(&query)
            .bind(AnalysisStatus::Pending.code())
            .bind(AnalysisStatus::Running.code())
            .fetch_all(pool)
            .await
    }

    /// Delete terminal analyses that ended before `now - age`.
    pub async fn delete_older_than(
        pool: &PgPool,
        age: chrono::Duration,
    ) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - age;
        let result = sqlx::query(
            "DELETE FROM analyses \
             WHERE status NOT IN ($1, $2) \
               AND COALESCE(ended_at, submitted_at) < $3",
        )
        .bind(AnalysisStatus::Pending.code())
        .bind(AnalysisStatus::Running.code())
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn status_counts(pool: &PgPool) -> Result<StatusCounts, sqlx::Error> {
        let rows: Vec<(StatusCode, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM analyses GROUP BY status")
                .fetch_all(pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (code, n) in rows {
            match AnalysisStatus::from_code(code) {
                Some(status) => counts.add(status, u64::try_from(n).unwrap_or(0)),
                None => tracing::warn!(status = code, "Ignoring unknown analysis status code"),
            }
        }
        Ok(counts)
    }
}
