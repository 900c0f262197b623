//! Pre-launch resource estimates for tree-building workflows.
//!
//! Alignments whose estimated footprint exceeds the configured limits are
//! refused before anything is uploaded to the remote system. The models
//! are regressions fitted on past runs; memory is in bytes, time in
//! seconds, both for the whole set of bootstrap replicates.

use std::time::Duration;

use phylo_core::{AlignmentStats, AnalysisInputs, Workflow};

pub const PHYML_TOO_LARGE: &str = "The given multiple alignment is too large to be analyzed \
online with PhyML-SMS, please consider using PhyML-SMS locally or using FastTree workflow";
pub const FASTTREE_TOO_LARGE: &str = "The given multiple alignment is too large to be analyzed \
online with FastTree, please consider using FastTree locally";

/// Estimated peak memory and total runtime of one workflow step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunEstimate {
    pub memory_bytes: f64,
    pub seconds: f64,
}

/// Support computation on the inferred bootstrap trees.
pub fn booster(stats: &AlignmentStats, replicates: u32) -> RunEstimate {
    let n = stats.sequences as f64;
    RunEstimate {
        memory_bytes: (4865.453 + 9.197 * n).powi(2),
        seconds: (-1.370621 + 0.002035 * n).powi(2) * f64::from(replicates),
    }
}

pub fn fasttree(stats: &AlignmentStats, replicates: u32) -> RunEstimate {
    let n = stats.sequences as f64;
    let len = stats.length as f64;
    let alphabet = if stats.amino_acids { 20.0 } else { 4.0 };
    RunEstimate {
        memory_bytes: 2872.0 + 0.003412 * (n.powf(1.5) + n * len * alphabet),
        seconds: (0.5071 + 6.141e-8 * n.powf(1.5) * n.ln() * len * alphabet)
            * f64::from(replicates),
    }
}

pub fn phyml(stats: &AlignmentStats, replicates: u32) -> RunEstimate {
    let n = stats.sequences as f64;
    let len = stats.length as f64;
    let w = if stats.amino_acids { 1.1 } else { 0.0 };
    let cells = n * n * len;
    RunEstimate {
        memory_bytes: 3352.7636 - 884.7005 * w + 158.6359 * n - 5.0467 * len + 81.0603 * n * w
            - 51.2838 * len * w
            + 0.3754 * len * n
            + 1.7922 * len * n * w,
        seconds: (3.526 + 30.18 * w + 2.227e-5 * cells + 6.672e-5 * w * cells)
            * f64::from(replicates),
    }
}

/// Caps applied before a tree-building workflow is launched. `None`
/// disables the corresponding check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<u64>,
    pub runtime: Option<Duration>,
}

impl ResourceLimits {
    /// The user-facing reason to refuse `inputs`, if their estimate exceeds
    /// a limit. Analyses without alignment dimensions are always admitted.
    pub fn refusal(&self, inputs: &AnalysisInputs) -> Option<&'static str> {
        let stats = inputs.alignment.as_ref()?;
        let replicates = inputs.bootstrap_replicates;
        let (tree, refusal) = match inputs.workflow {
            Workflow::SupportOnly => return None,
            Workflow::PhymlSms => (phyml(stats, replicates), PHYML_TOO_LARGE),
            Workflow::FastTree => (fasttree(stats, replicates), FASTTREE_TOO_LARGE),
        };
        let support = booster(stats, replicates);

        let memory = tree.memory_bytes.max(support.memory_bytes);
        let seconds = tree.seconds + support.seconds;
        let over_memory = self.memory_bytes.is_some_and(|limit| memory > limit as f64);
        let over_time = self
            .runtime
            .is_some_and(|limit| seconds > limit.as_secs_f64());
        if !(over_memory || over_time) {
            return None;
        }

        tracing::warn!(
            workflow = %inputs.workflow,
            sequences = stats.sequences,
            length = stats.length,
            tree_memory = tree.memory_bytes,
            tree_seconds = tree.seconds,
            support_memory = support.memory_bytes,
            support_seconds = support.seconds,
            "Alignment exceeds resource limits",
        );
        Some(refusal)
    }
}
