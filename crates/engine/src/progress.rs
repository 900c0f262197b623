//! Periodic persistence of an execution's progress counter.

use std::sync::Arc;
use std::time::Duration;

use phylo_compute::Execution;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::engine::Shared;
use crate::registry::TrackedAnalysis;

/// Read `execution.progress()` every `interval` and persist it whenever it
/// increased, until `done` fires (or its sender is dropped). A final
/// reading is always taken before returning.
pub(crate) async fn report_progress(
    shared: Arc<Shared>,
    tracked: Arc<TrackedAnalysis>,
    execution: Arc<dyn Execution>,
    interval: Duration,
    mut done: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut done => break,
            _ = ticker.tick() => record(&shared, &tracked, execution.as_ref()).await,
        }
    }

    record(&shared, &tracked, execution.as_ref()).await;
}

async fn record(shared: &Shared, tracked: &TrackedAnalysis, execution: &dyn Execution) {
    let mut job = tracked.lock().await;
    if job.is_terminal() {
        return;
    }
    if job.record_progress(execution.progress()) {
        tracing::debug!(analysis_id = %job.id, progress = job.progress, "Progress");
        shared.persist(&job).await;
    }
}
