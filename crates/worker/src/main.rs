//! `phylo-worker` -- runs the support analysis engine as a service.
//!
//! Wires a store, a compute backend and a notifier into the engine, logs
//! analysis lifecycle events and shuts down cleanly on SIGINT/SIGTERM.
//!
//! | Variable       | Default | Description                                  |
//! |----------------|---------|----------------------------------------------|
//! | `DATABASE_URL` | --      | PostgreSQL; in-memory store when unset       |
//! | `LOG_FORMAT`   | `text`  | `json` for one JSON object per log line      |
//! | `RUST_LOG`     | `phylo_worker=debug,phylo_engine=debug` | log filter |
//!
//! Engine, backend and e-mail variables are documented on
//! `EngineConfig::from_env`, [`backend::BackendSettings`] and
//! `EmailConfig::from_env`.

mod backend;

use std::sync::Arc;

use anyhow::Context;
use phylo_db::{AnalysisStore, MemoryStore, PgStore};
use phylo_engine::{Engine, EngineConfig};
use phylo_events::{EmailConfig, EmailNotifier, EventBus, JobEvent, Notifier, NullNotifier};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::BackendSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let store = open_store().await?;
    let backend = BackendSettings::from_env()?.build(config.job_threads, config.timeout);
    let notifier: Arc<dyn Notifier> = match EmailConfig::from_env() {
        Some(email) => {
            tracing::info!(smtp_host = %email.smtp_host, "E-mail notifications enabled");
            Arc::new(EmailNotifier::new(email))
        }
        None => {
            tracing::info!("SMTP_HOST or SMTP_FROM not set, e-mail notifications disabled");
            Arc::new(NullNotifier)
        }
    };

    let bus = Arc::new(EventBus::default());
    let logger = tokio::spawn(log_events(bus.subscribe()));

    let engine = Engine::builder(config, store, backend)
        .notifier(notifier)
        .event_bus(bus)
        .start()
        .await
        .context("Failed to start the analysis engine")?;

    match engine.status_counts().await {
        Ok(counts) => tracing::info!(?counts, "Engine ready"),
        Err(e) => tracing::warn!(error = %e, "Could not read analysis counts"),
    }

    shutdown_signal().await;
    engine.shutdown().await;
    logger.abort();

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "phylo_worker=debug,phylo_engine=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn open_store() -> anyhow::Result<Arc<dyn AnalysisStore>> {
    let Some(database_url) = std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()) else {
        tracing::warn!("DATABASE_URL not set, analyses are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = phylo_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    phylo_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    phylo_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(PgStore::new(pool)))
}

/// Log every lifecycle event published on the bus.
async fn log_events(mut events: broadcast::Receiver<JobEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::info!(
                analysis_id = %event.analysis_id,
                status = %event.status,
                progress = event.progress,
                message = %event.message,
                "Analysis event",
            ),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
