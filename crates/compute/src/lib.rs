//! Compute backends for support analyses.
//!
//! - [`backend`] — the [`ComputeBackend`] / [`Execution`] contract the
//!   engine drives.
//! - [`local`] — in-process executions ([`LocalBackend`]), with a
//!   command-line tool runner.
//! - [`remote`] — executions delegated to a remote workflow system
//!   ([`RemoteBackend`]).

pub mod artifacts;
pub mod backend;
pub mod local;
pub mod remote;

pub use backend::{BackendError, BackendReport, BackendState, ComputeBackend, Execution};
pub use local::command::CommandComputation;
pub use local::{LocalBackend, ProgressCounter, SupportComputation};
pub use remote::{HttpWorkflowApi, RemoteBackend, ResourceLimits, WorkflowApi};
