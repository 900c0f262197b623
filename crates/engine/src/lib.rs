//! Job orchestration for support analyses.
//!
//! [`Engine`] accepts analyses through a bounded queue, runs them on a
//! fixed pool of workers against a [`ComputeBackend`](phylo_compute::ComputeBackend),
//! enforces timeouts, persists every transition and cancels everything in
//! flight on shutdown.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;

mod progress;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineBuilder, Processor};
pub use error::EngineError;
pub use registry::{JobRegistry, TrackedAnalysis};
