//! `PgStore` against a real PostgreSQL database.
//!
//! Run with `DATABASE_URL` set and `cargo test -p phylo-db -- --ignored`.

use chrono::Utc;
use phylo_core::{Analysis, AnalysisId, AnalysisInputs, AnalysisStatus};
use phylo_db::{AnalysisStore, PgStore, StoreError};
use sqlx::PgPool;

fn analysis(id: &str) -> Analysis {
    Analysis::new(
        AnalysisId::new(id),
        AnalysisInputs::support("/tmp/ref.nw", "/tmp/boot.nw"),
        Utc::now(),
    )
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn put_then_get_returns_latest_version(pool: PgPool) {
    let store = PgStore::new(pool);
    let mut a = analysis("pg-1");
    store.put(&a).await.unwrap();

    a.start(Utc::now()).unwrap();
    a.record_progress(12);
    store.put(&a).await.unwrap();

    let stored = store.get(&a.id).await.unwrap();
    assert_eq!(stored.status, AnalysisStatus::Running);
    assert_eq!(stored.progress, 12);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn missing_analysis_is_not_found(pool: PgPool) {
    let store = PgStore::new(pool);
    let err = store.get(&AnalysisId::new("absent")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn unfinished_and_counts(pool: PgPool) {
    let store = PgStore::new(pool);
    let mut running = analysis("pg-run");
    running.start(Utc::now()).unwrap();
    let mut done = analysis("pg-done");
    done.finish(AnalysisStatus::Canceled, "x", Utc::now()).unwrap();
    store.put(&running).await.unwrap();
    store.put(&done).await.unwrap();

    let unfinished = store.list_unfinished().await.unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].id, running.id);

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.running, 1);
    assert_eq!(counts.canceled, 1);
}
