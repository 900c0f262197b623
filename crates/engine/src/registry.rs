//! Concurrent registry of in-flight analyses.
//!
//! An analysis is registered at submission and removed once it reaches a
//! terminal state. The number of registered analyses is what the queue
//! capacity bounds. Closing the registry drains it and makes every later
//! registration fail, which is how shutdown and submission stay consistent.

use std::collections::HashMap;
use std::sync::Arc;

use phylo_compute::Execution;
use phylo_core::{Analysis, AnalysisId};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// TrackedAnalysis
// ---------------------------------------------------------------------------

/// Per-analysis state shared by its worker, its progress task and shutdown.
///
/// Every mutation of the record happens under [`lock`](Self::lock), so
/// writes to the store are serialized per analysis.
pub struct TrackedAnalysis {
    id: AnalysisId,
    analysis: Mutex<Analysis>,
    cancel: CancellationToken,
    execution: Mutex<Option<Arc<dyn Execution>>>,
    registered_at: Instant,
}

impl std::fmt::Debug for TrackedAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedAnalysis")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl TrackedAnalysis {
    fn new(analysis: Analysis) -> Self {
        Self {
            id: analysis.id.clone(),
            analysis: Mutex::new(analysis),
            cancel: CancellationToken::new(),
            execution: Mutex::new(None),
            registered_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &AnalysisId {
        &self.id
    }

    pub async fn lock(&self) -> MutexGuard<'_, Analysis> {
        self.analysis.lock().await
    }

    pub async fn snapshot(&self) -> Analysis {
        self.analysis.lock().await.clone()
    }

    /// Fires when the analysis must stop (shutdown).
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Instant of submission on the runtime clock; timeouts count from here.
    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    pub async fn attach(&self, execution: Arc<dyn Execution>) {
        *self.execution.lock().await = Some(execution);
    }

    /// Take the attached execution. Whoever takes it is responsible for
    /// canceling it, so a backend is asked to stop at most once.
    pub async fn take_execution(&self) -> Option<Arc<dyn Execution>> {
        self.execution.lock().await.take()
    }
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// Why [`JobRegistry::try_register`] refused an analysis. The analysis is
/// handed back untouched.
#[derive(Debug)]
pub enum Rejected {
    Full(Analysis),
    Closed(Analysis),
    Duplicate(Analysis),
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<AnalysisId, Arc<TrackedAnalysis>>,
    closed: bool,
}

#[derive(Default)]
pub struct JobRegistry {
    inner: RwLock<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `analysis` unless `capacity` in-flight analyses are already
    /// tracked, the id is already tracked, or the registry is closed.
    pub async fn try_register(
        &self,
        analysis: Analysis,
        capacity: usize,
    ) -> Result<Arc<TrackedAnalysis>, Rejected> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(Rejected::Closed(analysis));
        }
        if inner.jobs.contains_key(&analysis.id) {
            return Err(Rejected::Duplicate(analysis));
        }
        if inner.jobs.len() >= capacity {
            return Err(Rejected::Full(analysis));
        }
        let tracked = Arc::new(TrackedAnalysis::new(analysis));
        inner
            .jobs
            .insert(tracked.id().clone(), Arc::clone(&tracked));
        Ok(tracked)
    }

    pub async fn get(&self, id: &AnalysisId) -> Option<Arc<TrackedAnalysis>> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    pub async fn remove(&self, id: &AnalysisId) -> Option<Arc<TrackedAnalysis>> {
        self.inner.write().await.jobs.remove(id)
    }

    /// Refuse all further registrations and hand back every tracked
    /// analysis. A second call returns nothing.
    pub async fn close_and_drain(&self) -> Vec<Arc<TrackedAnalysis>> {
        let mut inner = self.inner.write().await;
        inner.closed = true;
        inner.jobs.drain().map(|(_, tracked)| tracked).collect()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.jobs.is_empty()
    }
}
