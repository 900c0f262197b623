//! Backend that delegates computations to a remote workflow system and
//! watches them by polling.

pub mod api;
pub mod estimate;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phylo_core::{Analysis, Artifacts, Workflow};

pub use api::{HttpWorkflowApi, RemoteJobStatus, WorkflowApi};
pub use estimate::ResourceLimits;

use crate::artifacts::{clean_tbe_logs, FBP_TREE, TBE_LOGS, TBE_NORM_TREE, TBE_RAW_TREE};
use crate::backend::{BackendError, BackendReport, BackendState, ComputeBackend, Execution};

/// Default interval between two status checks of a remote job.
pub const DEFAULT_REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Map a remote state string onto a [`BackendState`].
///
/// `ok` maps to an empty `Finished`; the caller fills in the artifacts.
pub fn map_remote_state(state: &str) -> BackendState {
    match state {
        "new" | "queued" | "waiting" => BackendState::Queued,
        "running" => BackendState::Running,
        "ok" => BackendState::Finished(Artifacts::new()),
        "error" | "failed" => BackendState::Failed(format!("Remote job failed ({state})")),
        "deleted" | "canceled" | "cancelled" => BackendState::Canceled,
        other => BackendState::Unknown(other.to_string()),
    }
}

/// Remote output name to local artifact name, for a given workflow.
///
/// Tree-building workflows name their classical support tree `out_tree`.
fn required_outputs(workflow: Workflow) -> [(&'static str, &'static str); 4] {
    let fbp_output = match workflow {
        Workflow::SupportOnly => "fbp_tree",
        Workflow::PhymlSms | Workflow::FastTree => "out_tree",
    };
    [
        (fbp_output, FBP_TREE),
        ("tbe_norm_tree", TBE_NORM_TREE),
        ("tbe_raw_tree", TBE_RAW_TREE),
        ("tbe_log", TBE_LOGS),
    ]
}

// ---------------------------------------------------------------------------
// RemoteBackend
// ---------------------------------------------------------------------------

pub struct RemoteBackend<A> {
    api: Arc<A>,
    poll_interval: Duration,
    limits: ResourceLimits,
}

impl<A: WorkflowApi> RemoteBackend<A> {
    pub fn new(api: A) -> Self {
        Self {
            api: Arc::new(api),
            poll_interval: DEFAULT_REMOTE_POLL_INTERVAL,
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Refuse tree-building analyses estimated to exceed `limits`.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[async_trait]
impl<A: WorkflowApi> ComputeBackend for RemoteBackend<A> {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn cpu_bound(&self) -> bool {
        false
    }

    async fn start(&self, analysis: &Analysis) -> Result<Box<dyn Execution>, BackendError> {
        if let Some(refusal) = self.limits.refusal(&analysis.inputs) {
            return Err(BackendError::Rejected(refusal.to_string()));
        }
        let job = self.api.launch(analysis).await?;
        tracing::info!(analysis_id = %analysis.id, remote_job = %job, "Remote job launched");
        Ok(Box::new(RemoteExecution {
            api: Arc::clone(&self.api),
            job,
            workflow: analysis.inputs.workflow,
            poll_interval: self.poll_interval,
        }))
    }
}

// ---------------------------------------------------------------------------
// RemoteExecution
// ---------------------------------------------------------------------------

struct RemoteExecution<A> {
    api: Arc<A>,
    job: String,
    workflow: Workflow,
    poll_interval: Duration,
}

impl<A: WorkflowApi> RemoteExecution<A> {
    /// Download every required output. A missing output turns the report
    /// into a failure; a failed download is a poll error and is retried.
    async fn collect(&self, status: &RemoteJobStatus) -> Result<BackendState, BackendError> {
        let mut artifacts = Artifacts::new();
        for (output, artifact) in required_outputs(self.workflow) {
            let Some(output_id) = status.outputs.get(output) else {
                return Ok(BackendState::Failed(format!(
                    "Remote job {} finished without output {output}",
                    self.job
                )));
            };
            let mut content = self.api.fetch_output(&self.job, output_id).await?;
            if artifact == TBE_LOGS {
                content = clean_tbe_logs(&content);
            }
            artifacts.insert(artifact.to_string(), content);
        }
        Ok(BackendState::Finished(artifacts))
    }
}

#[async_trait]
impl<A: WorkflowApi> Execution for RemoteExecution<A> {
    fn remote_ref(&self) -> Option<&str> {
        Some(&self.job)
    }

    async fn poll(&self) -> Result<BackendReport, BackendError> {
        let status = self.api.status(&self.job).await?;
        let state = match map_remote_state(&status.state) {
            BackendState::Finished(_) => self.collect(&status).await?,
            other => other,
        };
        Ok(BackendReport::new(state))
    }

    /// Remote systems do not report replicate counts.
    fn progress(&self) -> u64 {
        0
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        self.api.cancel(&self.job).await
    }

    async fn release(&self) -> Result<(), BackendError> {
        self.api.release(&self.job).await?;
        tracing::debug!(remote_job = %self.job, "Remote job deleted");
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
