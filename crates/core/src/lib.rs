//! Domain types for phylogenetic support analyses.
//!
//! Pure logic only: the analysis record and its state machine, identifiers,
//! hashing, and worker-pool sizing rules. No I/O.

pub mod analysis;
pub mod error;
pub mod hashing;
pub mod resources;
pub mod status;
pub mod types;

pub use analysis::{
    AlignmentStats, Analysis, AnalysisId, AnalysisInputs, Artifacts, InputFile, InputRole,
    NotificationTarget, Workflow,
};
pub use error::CoreError;
pub use status::AnalysisStatus;
pub use types::Timestamp;
