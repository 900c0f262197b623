//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] publishes a [`JobEvent`] every time the engine changes an
//! analysis' status. It is designed to be shared via `Arc<EventBus>`.

use chrono::Utc;
use phylo_core::{Analysis, AnalysisId, AnalysisStatus, Timestamp};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// Snapshot of an analysis taken right after a status change.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub analysis_id: AnalysisId,
    pub status: AnalysisStatus,
    pub message: String,
    pub progress: u64,
    pub timestamp: Timestamp,
}

impl JobEvent {
    pub fn from_analysis(analysis: &Analysis) -> Self {
        Self {
            analysis_id: analysis.id.clone(),
            status: analysis.status,
            message: analysis.message.clone(),
            progress: analysis.progress,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use phylo_events::EventBus;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed events are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: JobEvent) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
