//! The orchestration engine: bounded submission, a fixed pool of workers,
//! shutdown and startup recovery.
//!
//! Submissions are registered in the [`JobRegistry`] and pushed onto a
//! bounded `mpsc` queue that all workers share. Capacity bounds the number
//! of in-flight analyses (queued plus running); anything beyond it is
//! stored as `Canceled` immediately and [`EngineError::QueueFull`] is
//! returned. `submit` never waits for queue space.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phylo_compute::{ComputeBackend, Execution};
use phylo_core::{Analysis, AnalysisId, AnalysisStatus, Artifacts};
use phylo_db::{AnalysisStore, StatusCounts, StoreError};
use phylo_events::{EventBus, JobEvent, Notifier, NullNotifier};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::registry::{JobRegistry, Rejected, TrackedAnalysis};
use crate::worker;

pub const QUEUE_FULL_MESSAGE: &str = "Computing queue is full, please try again in a few minutes";
pub const STOPPING_MESSAGE: &str = "Server is stopping, please try again in a few minutes";
pub const SHUTDOWN_MESSAGE: &str = "Canceled after shutdown";
pub const RESTART_MESSAGE: &str = "Canceled after a restart";
pub const TIMEOUT_MESSAGE: &str = "Time out: Job canceled";

/// Upper bound on a single best-effort backend cancellation or release.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// What request handlers need from the engine.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Enqueue a `Pending` analysis without blocking.
    async fn submit(&self, analysis: Analysis) -> Result<(), EngineError>;

    /// Cancel every queued or running analysis and refuse new ones.
    async fn cancel_all_running(&self) -> Result<(), EngineError>;
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// How a run ended, before it is applied to the record.
#[derive(Debug)]
pub(crate) enum Outcome {
    Finished(Artifacts),
    Failed(String),
    Canceled(String),
    TimedOut,
}

/// Everything workers, progress tasks and the engine handle share.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn AnalysisStore>,
    pub(crate) backend: Arc<dyn ComputeBackend>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<EventBus>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) registry: Arc<JobRegistry>,
}

impl Shared {
    /// Write the record. Failures are logged; the engine keeps going with
    /// its in-memory state.
    pub(crate) async fn persist(&self, analysis: &Analysis) {
        if let Err(e) = self.store.put(analysis).await {
            tracing::error!(
                analysis_id = %analysis.id,
                status = %analysis.status,
                error = %e,
                "Failed to persist analysis",
            );
        }
    }

    pub(crate) fn publish(&self, analysis: &Analysis) {
        self.bus.publish(JobEvent::from_analysis(analysis));
    }

    /// Apply `outcome`, persist and publish. Returns the final record, or
    /// `None` if the analysis had already ended.
    pub(crate) async fn finalize(
        &self,
        tracked: &TrackedAnalysis,
        outcome: Outcome,
    ) -> Option<Analysis> {
        let mut job = tracked.lock().await;
        if job.is_terminal() {
            return None;
        }
        let now = self.clock.now();
        let applied = match outcome {
            Outcome::Finished(artifacts) => job.complete(artifacts, now),
            Outcome::Failed(message) => job.finish(AnalysisStatus::Error, message, now),
            Outcome::Canceled(message) => job.finish(AnalysisStatus::Canceled, message, now),
            Outcome::TimedOut => job.finish(AnalysisStatus::TimedOut, TIMEOUT_MESSAGE, now),
        };
        if let Err(e) = applied {
            tracing::error!(analysis_id = %job.id, error = %e, "Cannot end analysis");
            return None;
        }

        tracing::info!(
            analysis_id = %job.id,
            status = %job.status,
            message = %job.message,
            progress = job.progress,
            "Analysis ended",
        );
        self.persist(&job).await;
        self.publish(&job);
        Some(job.clone())
    }

    pub(crate) async fn notify(&self, analysis: &Analysis) {
        if let Err(e) = self
            .notifier
            .notify(analysis.status, &analysis.id, &analysis.notification)
            .await
        {
            tracing::warn!(analysis_id = %analysis.id, error = %e, "Notification failed");
        }
    }

    /// Cancel every analysis left unfinished by a previous process.
    async fn recover(&self) -> Result<usize, StoreError> {
        let unfinished = self.store.list_unfinished().await?;
        let now = self.clock.now();
        let mut recovered = 0;
        for mut analysis in unfinished {
            if let Err(e) = analysis.finish(AnalysisStatus::Canceled, RESTART_MESSAGE, now) {
                tracing::warn!(analysis_id = %analysis.id, error = %e, "Cannot recover analysis");
                continue;
            }
            self.persist(&analysis).await;
            self.publish(&analysis);
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!(count = recovered, "Canceled analyses left over from a previous run");
        }
        Ok(recovered)
    }

    async fn purge(&self) {
        if self.config.retention_days == 0 {
            return;
        }
        let age = chrono::Duration::days(i64::from(self.config.retention_days));
        match self.store.delete_older_than(age).await {
            Ok(deleted) => tracing::info!(
                deleted,
                retention_days = self.config.retention_days,
                "Purged old analyses",
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to purge old analyses"),
        }
    }
}

/// Delete the temporary input files of `analysis`. Errors are logged.
pub(crate) async fn release_inputs(analysis: &Analysis) {
    for path in analysis.inputs.temporary_files() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::trace!(
                analysis_id = %analysis.id,
                path = %path.display(),
                "Input released",
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                analysis_id = %analysis.id,
                path = %path.display(),
                error = %e,
                "Failed to delete temporary input",
            ),
        }
    }
}

/// Ask the backend to stop, bounded by [`CANCEL_TIMEOUT`].
pub(crate) async fn cancel_execution(id: &AnalysisId, execution: &dyn Execution) {
    match tokio::time::timeout(CANCEL_TIMEOUT, execution.cancel()).await {
        Ok(Ok(())) => tracing::debug!(analysis_id = %id, "Backend execution canceled"),
        Ok(Err(e)) => tracing::warn!(analysis_id = %id, error = %e, "Backend cancellation failed"),
        Err(_) => tracing::warn!(analysis_id = %id, "Backend cancellation timed out"),
    }
}

/// Free what the backend still holds for an ended execution, bounded by
/// [`CANCEL_TIMEOUT`].
pub(crate) async fn release_execution(id: &AnalysisId, execution: &dyn Execution) {
    match tokio::time::timeout(CANCEL_TIMEOUT, execution.release()).await {
        Ok(Ok(())) => tracing::trace!(analysis_id = %id, "Backend execution released"),
        Ok(Err(e)) => tracing::warn!(analysis_id = %id, error = %e, "Backend release failed"),
        Err(_) => tracing::warn!(analysis_id = %id, "Backend release timed out"),
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`Engine`]. Only the store and backend are required.
pub struct EngineBuilder {
    config: EngineConfig,
    store: Arc<dyn AnalysisStore>,
    backend: Arc<dyn ComputeBackend>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    registry: Arc<JobRegistry>,
}

impl EngineBuilder {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn AnalysisStore>,
        backend: Arc<dyn ComputeBackend>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            notifier: Arc::new(NullNotifier),
            bus: Arc::new(EventBus::default()),
            clock: Arc::new(SystemClock),
            registry: Arc::new(JobRegistry::new()),
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Validate the configuration, cancel analyses left over from a
    /// previous run, purge old records and spawn the workers.
    pub async fn start(self) -> Result<Engine, EngineError> {
        self.config.validate(self.backend.cpu_bound())?;

        tracing::info!(
            backend = self.backend.name(),
            workers = self.config.workers,
            queue_size = self.config.queue_capacity,
            job_threads = self.config.job_threads,
            timeout_secs = self.config.timeout.map_or(0, |t| t.as_secs()),
            "Starting analysis engine",
        );

        let shared = Arc::new(Shared {
            config: self.config,
            store: self.store,
            backend: self.backend,
            notifier: self.notifier,
            bus: self.bus,
            clock: self.clock,
            registry: self.registry,
        });

        // A store that cannot list leftovers must not keep new analyses out.
        if let Err(e) = shared.recover().await {
            tracing::error!(error = %e, "Startup recovery failed, leftover analyses stay unfinished");
        }
        shared.purge().await;

        let (sender, receiver) = mpsc::channel(shared.config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let worker_cancel = CancellationToken::new();
        let workers = (0..shared.config.workers)
            .map(|index| {
                tokio::spawn(worker::run_worker(
                    index,
                    Arc::clone(&shared),
                    Arc::clone(&receiver),
                    worker_cancel.clone(),
                ))
            })
            .collect();

        Ok(Engine {
            shared,
            sender,
            workers: Mutex::new(workers),
            worker_cancel,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    shared: Arc<Shared>,
    sender: mpsc::Sender<Arc<TrackedAnalysis>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_cancel: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Start an engine with the default notifier, event bus and clock.
    pub async fn start(
        config: EngineConfig,
        store: Arc<dyn AnalysisStore>,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self, EngineError> {
        EngineBuilder::new(config, store, backend).start().await
    }

    pub fn builder(
        config: EngineConfig,
        store: Arc<dyn AnalysisStore>,
        backend: Arc<dyn ComputeBackend>,
    ) -> EngineBuilder {
        EngineBuilder::new(config, store, backend)
    }

    pub async fn submit(&self, analysis: Analysis) -> Result<(), EngineError> {
        if analysis.status != AnalysisStatus::Pending {
            return Err(EngineError::InvalidSubmission {
                id: analysis.id.clone(),
                status: analysis.status,
                reason: format!("status is {}", analysis.status),
            });
        }

        let capacity = self.shared.config.queue_capacity;
        let tracked = match self.shared.registry.try_register(analysis, capacity).await {
            Ok(tracked) => tracked,
            Err(Rejected::Full(analysis)) => {
                let id = analysis.id.clone();
                self.reject(analysis, QUEUE_FULL_MESSAGE).await;
                return Err(EngineError::QueueFull { id });
            }
            Err(Rejected::Closed(analysis)) => {
                let id = analysis.id.clone();
                self.reject(analysis, STOPPING_MESSAGE).await;
                return Err(EngineError::ShuttingDown { id });
            }
            Err(Rejected::Duplicate(analysis)) => {
                return Err(EngineError::InvalidSubmission {
                    id: analysis.id,
                    status: analysis.status,
                    reason: "an analysis with this id is already in progress".into(),
                });
            }
        };

        {
            let job = tracked.lock().await;
            self.shared.persist(&job).await;
            self.shared.publish(&job);
        }

        if let Err(e) = self.sender.try_send(Arc::clone(&tracked)) {
            let id = tracked.id().clone();
            self.shared.registry.remove(&id).await;
            let (message, error) = match e {
                mpsc::error::TrySendError::Full(_) => {
                    (QUEUE_FULL_MESSAGE, EngineError::QueueFull { id })
                }
                mpsc::error::TrySendError::Closed(_) => {
                    (STOPPING_MESSAGE, EngineError::ShuttingDown { id })
                }
            };
            let outcome = Outcome::Canceled(message.to_string());
            if let Some(job) = self.shared.finalize(&tracked, outcome).await {
                release_inputs(&job).await;
            }
            return Err(error);
        }

        tracing::info!(analysis_id = %tracked.id(), "Analysis queued");
        Ok(())
    }

    /// Store a refused analysis as `Canceled` with `message`.
    async fn reject(&self, mut analysis: Analysis, message: &str) {
        tracing::warn!(analysis_id = %analysis.id, reason = message, "Analysis rejected");
        match analysis.finish(AnalysisStatus::Canceled, message, self.shared.clock.now()) {
            Ok(()) => {
                self.shared.persist(&analysis).await;
                self.shared.publish(&analysis);
            }
            Err(e) => tracing::error!(analysis_id = %analysis.id, error = %e, "Cannot cancel analysis"),
        }
        release_inputs(&analysis).await;
    }

    /// Cancel every in-flight analysis and refuse new submissions.
    ///
    /// Backend cancellations run in detached tasks; this never waits for
    /// backend work to unwind. Calling it again is a no-op.
    pub async fn cancel_all_running(&self) -> Result<(), EngineError> {
        let drained = self.shared.registry.close_and_drain().await;
        if drained.is_empty() {
            return Ok(());
        }
        tracing::info!(count = drained.len(), "Canceling in-flight analyses");

        for tracked in drained {
            tracked.cancel_token().cancel();
            if let Some(execution) = tracked.take_execution().await {
                let id = tracked.id().clone();
                tokio::spawn(async move { cancel_execution(&id, execution.as_ref()).await });
            }
            let outcome = Outcome::Canceled(SHUTDOWN_MESSAGE.to_string());
            if let Some(job) = self.shared.finalize(&tracked, outcome).await {
                // Never picked up by a worker, so nobody else owns its inputs.
                if job.started_at.is_none() {
                    release_inputs(&job).await;
                }
            }
        }
        Ok(())
    }

    /// [`cancel_all_running`](Self::cancel_all_running), then stop the
    /// workers, aborting those still busy after the grace period.
    pub async fn shutdown(&self) {
        if let Err(e) = self.cancel_all_running().await {
            tracing::error!(error = %e, "Failed to cancel running analyses");
        }
        self.worker_cancel.cancel();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let deadline = tokio::time::Instant::now() + self.shared.config.shutdown_grace;
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!("Worker did not stop within the grace period, aborting");
                abort.abort();
            }
        }
        tracing::info!("Analysis engine stopped");
    }

    /// Latest known state of an analysis: the in-flight record if tracked,
    /// otherwise the stored one.
    pub async fn get(&self, id: &AnalysisId) -> Result<Analysis, EngineError> {
        if let Some(tracked) = self.shared.registry.get(id).await {
            return Ok(tracked.snapshot().await);
        }
        Ok(self.shared.store.get(id).await?)
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, EngineError> {
        Ok(self.shared.store.status_counts().await?)
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.shared.bus)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.shared.registry)
    }

    pub async fn is_stopping(&self) -> bool {
        self.shared.registry.is_closed().await
    }
}

#[async_trait]
impl Processor for Engine {
    async fn submit(&self, analysis: Analysis) -> Result<(), EngineError> {
        Engine::submit(self, analysis).await
    }

    async fn cancel_all_running(&self) -> Result<(), EngineError> {
        Engine::cancel_all_running(self).await
    }
}
