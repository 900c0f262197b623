//! In-memory [`AnalysisStore`].
//!
//! Everything is lost on restart, so `list_unfinished` only ever sees jobs
//! from the current process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use phylo_core::{Analysis, AnalysisId};
use tokio::sync::RwLock;

use crate::store::{AnalysisStore, StatusCounts, StoreError};

/// Analysis records held in a process-local map.
#[derive(Default)]
pub struct MemoryStore {
    analyses: RwLock<HashMap<AnalysisId, Analysis>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        tracing::info!("Using in-memory analysis store");
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.analyses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.analyses.read().await.is_empty()
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn get(&self, id: &AnalysisId) -> Result<Analysis, StoreError> {
        self.analyses
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn put(&self, analysis: &Analysis) -> Result<(), StoreError> {
        tracing::trace!(analysis_id = %analysis.id, status = %analysis.status, "Storing analysis");
        self.analyses
            .write()
            .await
            .insert(analysis.id.clone(), analysis.clone());
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<Analysis>, StoreError> {
        Ok(self
            .analyses
            .read()
            .await
            .values()
            .filter(|a| a.status.is_active())
            .cloned()
            .collect())
    }

    async fn delete_older_than(&self, age: chrono::Duration) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut analyses = self.analyses.write().await;
        let before = analyses.len();
        analyses.retain(|_, a| !(a.is_terminal() && a.is_older_than(age, now)));
        Ok((before - analyses.len()) as u64)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for analysis in self.analyses.read().await.values() {
            counts.add(analysis.status, 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use phylo_core::{AnalysisInputs, AnalysisStatus};

    use super::*;

    fn analysis(id: &str) -> Analysis {
        Analysis::new(AnalysisId::new(id), AnalysisInputs::default(), Utc::now())
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(&AnalysisId::new("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id.as_str() == "nope"));
    }

    #[tokio::test]
    async fn put_overwrites_previous_version() {
        let store = MemoryStore::new();
        let mut a = analysis("a");
        store.put(&a).await.unwrap();

        a.start(Utc::now()).unwrap();
        store.put(&a).await.unwrap();

        let stored = store.get(&a.id).await.unwrap();
        assert_eq!(stored.status, AnalysisStatus::Running);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_unfinished_returns_only_active() {
        let store = MemoryStore::new();
        let pending = analysis("p");
        let mut running = analysis("r");
        running.start(Utc::now()).unwrap();
        let mut done = analysis("d");
        done.finish(AnalysisStatus::Canceled, "x", Utc::now()).unwrap();

        for a in [&pending, &running, &done] {
            store.put(a).await.unwrap();
        }

        let mut ids: Vec<_> = store
            .list_unfinished()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["p", "r"]);
    }

    #[tokio::test]
    async fn purge_keeps_active_and_recent() {
        let store = MemoryStore::new();
        let old_time = Utc::now() - chrono::Duration::days(10);

        let mut old_done = Analysis::new(AnalysisId::new("old"), AnalysisInputs::default(), old_time);
        old_done
            .finish(AnalysisStatus::Canceled, "x", old_time)
            .unwrap();
        let old_pending =
            Analysis::new(AnalysisId::new("old-pending"), AnalysisInputs::default(), old_time);
        let recent = analysis("recent");

        for a in [&old_done, &old_pending, &recent] {
            store.put(a).await.unwrap();
        }

        let deleted = store
            .delete_older_than(chrono::Duration::days(5))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(&AnalysisId::new("old")).await.is_err());
        assert!(store.get(&AnalysisId::new("old-pending")).await.is_ok());
    }

    #[tokio::test]
    async fn counts_by_status() {
        let store = MemoryStore::new();
        let mut a = analysis("a");
        a.start(Utc::now()).unwrap();
        store.put(&a).await.unwrap();
        store.put(&analysis("b")).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 2);
    }
}
