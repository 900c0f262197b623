//! The analysis record: one submitted support computation and its lifecycle.
//!
//! All status changes go through [`Analysis::start`] and
//! [`Analysis::finish`], which enforce the transition table from
//! [`AnalysisStatus::can_transition_to`] and stamp the lifecycle
//! timestamps exactly once.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hashing::sha256_hex_parts;
use crate::status::AnalysisStatus;
use crate::types::Timestamp;

/// Named outputs produced by a backend, e.g. `"tbe_norm_tree" -> newick`.
pub type Artifacts = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// AnalysisId
// ---------------------------------------------------------------------------

/// Stable, immutable identifier of an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(String);

impl AnalysisId {
    /// Wrap an existing identifier (e.g. one read back from storage).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identifier (UUID v4, hyphen-less).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Identifier derived from the submitted input contents.
    ///
    /// Submitting the same reference and bootstrap trees twice yields the
    /// same id.
    pub fn from_content<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        Self(sha256_hex_parts(parts))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Tree-building workflow requested alongside the support computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    /// Reference and bootstrap trees are supplied; only supports are computed.
    #[default]
    SupportOnly,
    /// Trees are inferred from an alignment with PhyML-SMS first.
    PhymlSms,
    /// Trees are inferred from an alignment with FastTree first.
    FastTree,
}

impl Workflow {
    pub fn label(self) -> &'static str {
        match self {
            Self::SupportOnly => "Bootstrap alone",
            Self::PhymlSms => "PhyML-SMS",
            Self::FastTree => "FastTree",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Workflow {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PhyML-SMS" => Ok(Self::PhymlSms),
            "FastTree" => Ok(Self::FastTree),
            "Bootstrap alone" | "" => Ok(Self::SupportOnly),
            other => Err(CoreError::Validation(format!(
                "Phylogenetic workflow does not exist: {other}"
            ))),
        }
    }
}

/// Role of an input file within an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    ReferenceTree,
    BootstrapTrees,
    Alignment,
}

/// A caller-supplied file referenced by an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub role: InputRole,
    pub path: PathBuf,
    /// Whether the file was created for this analysis and must be
    /// deleted once the analysis no longer needs it.
    pub temporary: bool,
}

/// Shape of the multiple alignment a tree-building workflow starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentStats {
    pub sequences: u64,
    /// Number of sites.
    pub length: u64,
    /// Amino acids; nucleotides otherwise.
    #[serde(default)]
    pub amino_acids: bool,
}

/// Opaque inputs owned by an analysis until cleanup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInputs {
    pub files: Vec<InputFile>,
    pub workflow: Workflow,
    /// Number of bootstrap replicates to infer (tree-building workflows only).
    pub bootstrap_replicates: u32,
    /// Alignment dimensions, when trees are inferred from one.
    #[serde(default)]
    pub alignment: Option<AlignmentStats>,
    /// Backend-specific extra parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl AnalysisInputs {
    /// Inputs for the plain support workflow.
    pub fn support(reference: impl Into<PathBuf>, bootstrap: impl Into<PathBuf>) -> Self {
        Self {
            files: vec![
                InputFile {
                    role: InputRole::ReferenceTree,
                    path: reference.into(),
                    temporary: true,
                },
                InputFile {
                    role: InputRole::BootstrapTrees,
                    path: bootstrap.into(),
                    temporary: true,
                },
            ],
            ..Default::default()
        }
    }

    /// First file with the given role, if any.
    pub fn file(&self, role: InputRole) -> Option<&Path> {
        self.files
            .iter()
            .find(|f| f.role == role)
            .map(|f| f.path.as_path())
    }

    /// Paths that must be deleted when the analysis releases its inputs.
    pub fn temporary_files(&self) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .filter(|f| f.temporary)
            .map(|f| f.path.as_path())
    }
}

/// Who to tell when the analysis ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub email: Option<String>,
    pub run_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// One submitted computation request and its tracked lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub status: AnalysisStatus,
    pub message: String,
    pub progress: u64,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub inputs: AnalysisInputs,
    pub notification: NotificationTarget,
    /// Identifier of the delegated execution on a remote system.
    pub remote_ref: Option<String>,
    pub artifacts: Artifacts,
}

impl Analysis {
    /// Create a pending analysis submitted at `now`.
    pub fn new(id: AnalysisId, inputs: AnalysisInputs, now: Timestamp) -> Self {
        Self {
            id,
            status: AnalysisStatus::Pending,
            message: "Pending".to_string(),
            progress: 0,
            submitted_at: now,
            started_at: None,
            ended_at: None,
            inputs,
            notification: NotificationTarget::default(),
            remote_ref: None,
            artifacts: Artifacts::new(),
        }
    }

    pub fn with_notification(mut self, target: NotificationTarget) -> Self {
        self.notification = target;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Pending -> Running`. Stamps `started_at`.
    pub fn start(&mut self, now: Timestamp) -> Result<(), CoreError> {
        self.check_transition(AnalysisStatus::Running)?;
        self.status = AnalysisStatus::Running;
        self.message = "Running".to_string();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        Ok(())
    }

    /// Move into a terminal state. Stamps `ended_at`.
    ///
    /// Use [`complete`](Self::complete) for `Finished`, which carries
    /// artifacts.
    pub fn finish(
        &mut self,
        status: AnalysisStatus,
        message: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        if !status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "{status} is not a terminal status"
            )));
        }
        self.check_transition(status)?;
        self.status = status;
        self.message = message.into();
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// `Running -> Finished` with the backend's artifacts.
    pub fn complete(&mut self, artifacts: Artifacts, now: Timestamp) -> Result<(), CoreError> {
        self.finish(AnalysisStatus::Finished, "Finished", now)?;
        self.artifacts = artifacts;
        Ok(())
    }

    /// Record a progress reading. Returns `true` if the counter advanced.
    ///
    /// Readings lower than the current value are ignored.
    pub fn record_progress(&mut self, progress: u64) -> bool {
        if progress > self.progress {
            self.progress = progress;
            true
        } else {
            false
        }
    }

    /// Wall-clock time since submission, zero if `now` precedes it.
    pub fn elapsed_since_submission(&self, now: Timestamp) -> std::time::Duration {
        (now - self.submitted_at).to_std().unwrap_or_default()
    }

    /// Whether the analysis ended (or, if still active, was submitted)
    /// more than `age` before `now`.
    pub fn is_older_than(&self, age: chrono::Duration, now: Timestamp) -> bool {
        let reference = self.ended_at.unwrap_or(self.submitted_at);
        now - reference > age
    }

    fn check_transition(&self, next: AnalysisStatus) -> Result<(), CoreError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            })
        }
    }
}
