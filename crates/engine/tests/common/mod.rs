//! Shared fixtures for engine integration tests: a scripted backend, a
//! recording notifier and polling helpers. All timing is tokio virtual
//! time (`start_paused = true`).

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use phylo_compute::{BackendError, BackendReport, BackendState, ComputeBackend, Execution};
use phylo_core::{Analysis, AnalysisId, AnalysisInputs, AnalysisStatus, Artifacts, NotificationTarget};
use phylo_db::{AnalysisStore, MemoryStore};
use phylo_engine::{Engine, EngineConfig};
use phylo_events::{Notifier, NotifyError};
use tokio::time::Instant;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// What a fake execution does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Runs for the given time, then finishes with one artifact.
    FinishAfter(Duration),
    FailAfter(Duration, String),
    /// Reports an unrecognised state string after the given time.
    UnknownAfter(Duration, String),
    /// Reports that the backend itself canceled the work.
    CanceledAfter(Duration),
    /// Runs until canceled.
    Never,
    /// The first `n` polls fail, then the execution finishes.
    PollErrors(u32),
    /// `start` fails.
    StartError,
}

pub struct FakeBackend {
    script: Script,
    remote_ref: Option<String>,
    cpu_bound: bool,
    cancel_delay: Duration,
    pub starts: AtomicUsize,
    pub cancels: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    /// `"cancel"` and `"release"` in call order.
    pub calls: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeBackend {
    fn build(script: Script, remote_ref: Option<String>, cancel_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            cpu_bound: remote_ref.is_none(),
            remote_ref,
            cancel_delay,
            starts: AtomicUsize::new(0),
            cancels: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
            calls: Arc::default(),
        })
    }

    pub fn new(script: Script) -> Arc<Self> {
        Self::build(script, None, Duration::ZERO)
    }

    pub fn remote(script: Script, remote_ref: &str) -> Arc<Self> {
        Self::build(script, Some(remote_ref.to_string()), Duration::ZERO)
    }

    /// Every `cancel` takes `delay` to return.
    pub fn with_cancel_delay(script: Script, delay: Duration) -> Arc<Self> {
        Self::build(script, None, delay)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn cpu_bound(&self) -> bool {
        self.cpu_bound
    }

    async fn start(&self, _analysis: &Analysis) -> Result<Box<dyn Execution>, BackendError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if matches!(self.script, Script::StartError) {
            return Err(BackendError::Launch("no such tool".into()));
        }
        Ok(Box::new(FakeExecution {
            script: self.script.clone(),
            remote_ref: self.remote_ref.clone(),
            started: Instant::now(),
            polls: AtomicU32::new(0),
            cancel_delay: self.cancel_delay,
            cancels: Arc::clone(&self.cancels),
            releases: Arc::clone(&self.releases),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct FakeExecution {
    script: Script,
    remote_ref: Option<String>,
    started: Instant,
    polls: AtomicU32,
    cancel_delay: Duration,
    cancels: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeExecution {
    fn after(&self, duration: Duration, state: BackendState) -> BackendState {
        if self.started.elapsed() >= duration {
            state
        } else {
            BackendState::Running
        }
    }
}

pub fn result_artifacts() -> Artifacts {
    let mut artifacts = Artifacts::new();
    artifacts.insert("tbe_norm_tree".into(), "((A,B),C);".into());
    artifacts
}

#[async_trait]
impl Execution for FakeExecution {
    fn remote_ref(&self) -> Option<&str> {
        self.remote_ref.as_deref()
    }

    async fn poll(&self) -> Result<BackendReport, BackendError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let state = match &self.script {
            Script::FinishAfter(d) => self.after(*d, BackendState::Finished(result_artifacts())),
            Script::FailAfter(d, msg) => self.after(*d, BackendState::Failed(msg.clone())),
            Script::UnknownAfter(d, s) => self.after(*d, BackendState::Unknown(s.clone())),
            Script::CanceledAfter(d) => self.after(*d, BackendState::Canceled),
            Script::Never | Script::StartError => BackendState::Running,
            Script::PollErrors(n) => {
                if polls <= *n {
                    return Err(BackendError::Poll(format!("connection refused #{polls}")));
                }
                BackendState::Finished(result_artifacts())
            }
        };
        Ok(BackendReport::new(state))
    }

    /// One replicate per elapsed second.
    fn progress(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if !self.cancel_delay.is_zero() {
            tokio::time::sleep(self.cancel_delay).await;
        }
        self.calls.lock().unwrap().push("cancel");
        Ok(())
    }

    async fn release(&self) -> Result<(), BackendError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("release");
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(AnalysisStatus, AnalysisId, NotificationTarget)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(AnalysisStatus, AnalysisId, NotificationTarget)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        status: AnalysisStatus,
        id: &AnalysisId,
        target: &NotificationTarget,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((status, id.clone(), target.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn config(queue_capacity: usize, workers: usize) -> EngineConfig {
    EngineConfig {
        queue_capacity,
        workers,
        cpu_hint: Some(64),
        ..Default::default()
    }
}

pub fn analysis(id: &str) -> Analysis {
    Analysis::new(
        AnalysisId::new(id),
        AnalysisInputs::support(
            format!("/nonexistent/{id}/ref.nw"),
            format!("/nonexistent/{id}/boot.nw"),
        ),
        Utc::now(),
    )
}

pub async fn start_engine(
    config: EngineConfig,
    store: &Arc<MemoryStore>,
    backend: &Arc<FakeBackend>,
) -> Engine {
    Engine::start(config, store.clone(), backend.clone())
        .await
        .expect("engine should start")
}

/// Poll the store until the analysis satisfies `done`. Panics after an
/// hour of virtual time.
pub async fn wait_until(
    store: &MemoryStore,
    id: &str,
    done: impl Fn(&Analysis) -> bool,
) -> Analysis {
    let id = AnalysisId::new(id);
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            if let Ok(analysis) = store.get(&id).await {
                if done(&analysis) {
                    return analysis;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("analysis {id} never reached the expected state"))
}

pub async fn wait_for_status(store: &MemoryStore, id: &str, status: AnalysisStatus) -> Analysis {
    wait_until(store, id, |a| a.status == status).await
}

pub async fn wait_terminal(store: &MemoryStore, id: &str) -> Analysis {
    wait_until(store, id, |a| a.is_terminal()).await
}
