//! Shutdown, restart recovery, retention and startup validation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use common::*;
use phylo_core::{Analysis, AnalysisId, AnalysisStatus};
use phylo_db::{AnalysisStore, MemoryStore, StatusCounts, StoreError};
use phylo_engine::engine::{RESTART_MESSAGE, SHUTDOWN_MESSAGE};
use phylo_engine::{ConfigError, Engine, EngineConfig, EngineError};

// ---- Test: cancel everything in flight ----

#[tokio::test(start_paused = true)]
async fn cancel_all_cancels_running_and_queued_analyses() {
    let store = Arc::new(MemoryStore::new());
    let backend = FakeBackend::new(Script::Never);
    let engine = start_engine(config(5, 2), &store, &backend).await;

    for i in 0..5 {
        engine.submit(analysis(&format!("job-{i}"))).await.unwrap();
    }
    wait_until(&store, "job-0", |a| a.status == AnalysisStatus::Running).await;
    wait_until(&store, "job-1", |a| a.status == AnalysisStatus::Running).await;
    // Let both workers attach their executions.
    tokio::time::sleep(Duration::from_millis(10)).await;

    engine.cancel_all_running().await.unwrap();

    assert!(engine.registry().is_empty().await);
    for i in 0..5 {
        let job = store.get(&AnalysisId::new(format!("job-{i}"))).await.unwrap();
        assert_eq!(job.status, AnalysisStatus::Canceled, "job-{i}");
        assert_eq!(job.message, SHUTDOWN_MESSAGE);
        assert!(job.ended_at.is_some());
    }

    // Backend cancellations are detached; each running execution is asked
    // to stop exactly once.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.cancel_count(), 2);
    assert_eq!(
        backend.starts.load(std::sync::atomic::Ordering::SeqCst),
        2,
        "queued analyses must never start"
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_all_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let backend = FakeBackend::new(Script::Never);
    let engine = start_engine(config(5, 1), &store, &backend).await;

    engine.submit(analysis("only")).await.unwrap();
    wait_for_status(&store, "only", AnalysisStatus::Running).await;

    engine.cancel_all_running().await.unwrap();
    let first = store.get(&AnalysisId::new("only")).await.unwrap();
    engine.cancel_all_running().await.unwrap();
    let second = store.get(&AnalysisId::new("only")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.status, AnalysisStatus::Canceled);
}

#[tokio::test(start_paused = true)]
async fn canceled_analysis_is_not_overwritten_by_its_worker() {
    let store = Arc::new(MemoryStore::new());
    let backend = FakeBackend::new(Script::FinishAfter(Duration::from_secs(2)));
    let engine = start_engine(config(5, 1), &store, &backend).await;

    engine.submit(analysis("racing")).await.unwrap();
    wait_for_status(&store, "racing", AnalysisStatus::Running).await;
    engine.cancel_all_running().await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let job = store.get(&AnalysisId::new("racing")).await.unwrap();
    assert_eq!(job.status, AnalysisStatus::Canceled);
    assert!(job.artifacts.is_empty());
}

// ---- Test: graceful shutdown ----

#[tokio::test(start_paused = true)]
async fn shutdown_stops_workers_and_refuses_submissions() {
    let store = Arc::new(MemoryStore::new());
    let backend = FakeBackend::new(Script::Never);
    let engine = start_engine(config(5, 2), &store, &backend).await;

    engine.submit(analysis("busy")).await.unwrap();
    wait_for_status(&store, "busy", AnalysisStatus::Running).await;

    tokio::time::timeout(Duration::from_secs(60), engine.shutdown())
        .await
        .expect("shutdown should finish within the grace period");

    assert!(engine.is_stopping().await);
    assert_matches!(
        engine.submit(analysis("after")).await,
        Err(EngineError::ShuttingDown { .. })
    );
    assert_eq!(
        store.get(&AnalysisId::new("busy")).await.unwrap().status,
        AnalysisStatus::Canceled
    );
}

// ---- Test: restart recovery ----

#[tokio::test(start_paused = true)]
async fn analyses_left_running_are_canceled_on_startup() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();

    for id in ["stale-1", "stale-2"] {
        let mut job = analysis(id);
        job.start(now).unwrap();
        store.put(&job).await.unwrap();
    }
    store.put(&analysis("stale-pending")).await.unwrap();

    let mut done = analysis("done");
    done.start(now).unwrap();
    done.complete(result_artifacts(), now).unwrap();
    store.put(&done).await.unwrap();

    let backend = FakeBackend::new(Script::Never);
    let engine = start_engine(config(5, 1), &store, &backend).await;

    for id in ["stale-1", "stale-2", "stale-pending"] {
        let job = store.get(&AnalysisId::new(id)).await.unwrap();
        assert_eq!(job.status, AnalysisStatus::Canceled, "{id}");
        assert_eq!(job.message, RESTART_MESSAGE);
    }
    assert_eq!(store.get(&AnalysisId::new("done")).await.unwrap(), done);
    assert!(engine.registry().is_empty().await);
    assert_eq!(backend.starts.load(std::sync::atomic::Ordering::SeqCst), 0);
}

// ---- Test: a failing leftover listing does not block startup ----

struct UnlistableStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl AnalysisStore for UnlistableStore {
    async fn get(&self, id: &AnalysisId) -> Result<Analysis, StoreError> {
        self.inner.get(id).await
    }

    async fn put(&self, analysis: &Analysis) -> Result<(), StoreError> {
        self.inner.put(analysis).await
    }

    async fn list_unfinished(&self) -> Result<Vec<Analysis>, StoreError> {
        Err(StoreError::Corrupt {
            id: "stale".into(),
            reason: "unreadable inputs".into(),
        })
    }

    async fn delete_older_than(&self, age: chrono::Duration) -> Result<u64, StoreError> {
        self.inner.delete_older_than(age).await
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        self.inner.status_counts().await
    }
}

#[tokio::test(start_paused = true)]
async fn recovery_failure_still_starts_the_engine() {
    let store = Arc::new(MemoryStore::new());
    let mut stale = analysis("stale");
    stale.start(Utc::now()).unwrap();
    store.put(&stale).await.unwrap();

    let backend = FakeBackend::new(Script::FinishAfter(Duration::from_secs(1)));
    let engine = Engine::start(
        config(5, 1),
        Arc::new(UnlistableStore {
            inner: store.clone(),
        }),
        backend.clone(),
    )
    .await
    .expect("startup must survive a failed recovery");

    engine.submit(analysis("fresh")).await.unwrap();
    assert_eq!(
        wait_terminal(&store, "fresh").await.status,
        AnalysisStatus::Finished
    );
    // Left for the next successful recovery.
    assert_eq!(
        store.get(&AnalysisId::new("stale")).await.unwrap().status,
        AnalysisStatus::Running
    );
}

// ---- Test: retention ----

#[tokio::test(start_paused = true)]
async fn old_analyses_are_purged_on_startup() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();

    let mut old = analysis("old");
    old.submitted_at = now - chrono::Duration::days(10);
    old.finish(AnalysisStatus::Error, "boom", now - chrono::Duration::days(9))
        .unwrap();
    store.put(&old).await.unwrap();

    let mut recent = analysis("recent");
    recent
        .finish(AnalysisStatus::Error, "boom", now - chrono::Duration::hours(1))
        .unwrap();
    store.put(&recent).await.unwrap();

    let backend = FakeBackend::new(Script::Never);
    let cfg = EngineConfig {
        retention_days: 7,
        ..config(5, 1)
    };
    let _engine = start_engine(cfg, &store, &backend).await;

    assert_matches!(
        store.get(&AnalysisId::new("old")).await,
        Err(StoreError::NotFound(_))
    );
    assert!(store.get(&AnalysisId::new("recent")).await.is_ok());
}

// ---- Test: invalid configuration ----

#[tokio::test]
async fn zero_queue_size_fails_startup() {
    let store = Arc::new(MemoryStore::new());
    let backend = FakeBackend::new(Script::Never);
    let result = Engine::start(config(0, 1), store, backend).await;
    assert_matches!(result, Err(EngineError::Config(ConfigError::QueueSize)));
}

#[tokio::test]
async fn too_many_threads_for_the_machine_fails_startup() {
    let store = Arc::new(MemoryStore::new());
    let backend = FakeBackend::new(Script::Never);
    let cfg = EngineConfig {
        workers: 4,
        job_threads: 4,
        cpu_hint: Some(8),
        ..config(10, 4)
    };
    let result = Engine::start(cfg, store, backend).await;
    assert_matches!(result, Err(EngineError::Config(ConfigError::Capacity(_))));
}
