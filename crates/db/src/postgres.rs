//! PostgreSQL-backed [`AnalysisStore`].

use async_trait::async_trait;
use phylo_core::{Analysis, AnalysisId};

use crate::models::AnalysisRow;
use crate::repositories::AnalysisRepo;
use crate::store::{AnalysisStore, StatusCounts, StoreError};
use crate::DbPool;

/// Stores analyses in the `analyses` table.
///
/// Cheap to clone; the pool is reference counted.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl AnalysisStore for PgStore {
    async fn get(&self, id: &AnalysisId) -> Result<Analysis, StoreError> {
        AnalysisRepo::find_by_id(&self.pool, id.as_str())
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?
            .into_analysis()
    }

    async fn put(&self, analysis: &Analysis) -> Result<(), StoreError> {
        let row = AnalysisRow::from_analysis(analysis)?;
        AnalysisRepo::upsert(&self.pool, &row).await?;
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<Analysis>, StoreError> {
        AnalysisRepo::list_unfinished(&self.pool)
            .await?
            .into_iter()
            .map(AnalysisRow::into_analysis)
            .collect()
    }

    async fn delete_older_than(&self, age: chrono::Duration) -> Result<u64, StoreError> {
        let deleted = AnalysisRepo::delete_older_than(&self.pool, age).await?;
        tracing::info!(deleted, days = age.num_days(), "Deleted old analyses");
        Ok(deleted)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        Ok(AnalysisRepo::status_counts(&self.pool).await?)
    }
}
