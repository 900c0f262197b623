//! [`SupportComputation`] that shells out to a `booster`-style support tool.
//!
//! Two passes are run against the reference and bootstrap trees: a transfer
//! bootstrap pass (normalized tree, raw distance tree, per-taxon log) and a
//! classical bootstrap pass. Every non-empty line the tool writes to stderr
//! during the transfer pass counts as one processed replicate.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use phylo_core::{Analysis, Artifacts, InputRole};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{ProgressCounter, SupportComputation};
use crate::artifacts::{clean_tbe_logs, FBP_TREE, TBE_LOGS, TBE_NORM_TREE, TBE_RAW_TREE};
use crate::backend::BackendError;

/// Maximum number of stderr bytes kept as the transfer log (1 MiB).
const MAX_LOG_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Transfer,
    Classical,
}

impl Algorithm {
    fn flag(self) -> &'static str {
        match self {
            Self::Transfer => "tbe",
            Self::Classical => "fbp",
        }
    }
}

/// Output of one pass of the tool.
struct PassOutput {
    tree: String,
    raw_tree: Option<String>,
    log: String,
}

/// Runs the support tool found at `program`.
#[derive(Debug, Clone)]
pub struct CommandComputation {
    program: PathBuf,
    threads: usize,
    work_dir: PathBuf,
}

impl CommandComputation {
    pub fn new(program: impl Into<PathBuf>, threads: usize) -> Self {
        Self {
            program: program.into(),
            threads: threads.max(1),
            work_dir: std::env::temp_dir(),
        }
    }

    /// Directory that receives intermediate output files.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    fn build_command(
        &self,
        algorithm: Algorithm,
        reference: &Path,
        bootstrap: &Path,
        out: &Path,
        raw_out: Option<&Path>,
    ) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-a")
            .arg(algorithm.flag())
            .arg("-i")
            .arg(reference)
            .arg("-b")
            .arg(bootstrap)
            .arg("-o")
            .arg(out)
            .arg("-@")
            .arg(self.threads.to_string());
        if let Some(raw) = raw_out {
            cmd.arg("-r").arg(raw);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_pass(
        &self,
        analysis: &Analysis,
        algorithm: Algorithm,
        progress: Option<&ProgressCounter>,
        cancel: &CancellationToken,
    ) -> Result<PassOutput, BackendError> {
        let reference = analysis
            .inputs
            .file(InputRole::ReferenceTree)
            .ok_or_else(|| BackendError::Launch("Missing reference tree input".into()))?;
        let bootstrap = analysis
            .inputs
            .file(InputRole::BootstrapTrees)
            .ok_or_else(|| BackendError::Launch("Missing bootstrap trees input".into()))?;

        let out = self
            .work_dir
            .join(format!("{}_{}.nw", analysis.id, algorithm.flag()));
        let raw_out = (algorithm == Algorithm::Transfer)
            .then(|| self.work_dir.join(format!("{}_{}_raw.nw", analysis.id, algorithm.flag())));

        let mut cmd = self.build_command(algorithm, reference, bootstrap, &out, raw_out.as_deref());
        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::Launch(format!("{}: {e}", self.program.display())))?;

        tracing::debug!(
            analysis_id = %analysis.id,
            algorithm = algorithm.flag(),
            "Support tool started"
        );

        let stderr = child.stderr.take();
        let counter = progress.cloned();
        let log_task = tokio::spawn(async move {
            let mut log = String::new();
            let Some(stderr) = stderr else {
                return log;
            };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(counter) = &counter {
                    counter.increment();
                }
                if log.len() < MAX_LOG_BYTES {
                    log.push_str(&line);
                    log.push('\n');
                }
            }
            log
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                // Dropping `child` kills the process (`kill_on_drop`).
                drop(child);
                log_task.abort();
                remove_quietly(&out).await;
                if let Some(raw) = &raw_out {
                    remove_quietly(raw).await;
                }
                return Err(BackendError::Launch("Computation canceled".into()));
            }
        };

        let log = log_task.await.unwrap_or_default();
        let result = if status.success() {
            read_outputs(&out, raw_out.as_deref(), log).await
        } else {
            Err(BackendError::Launch(format!(
                "Support tool exited with {status}: {}",
                log.lines().last().unwrap_or_default()
            )))
        };

        remove_quietly(&out).await;
        if let Some(raw) = &raw_out {
            remove_quietly(raw).await;
        }
        result
    }
}

async fn read_outputs(
    out: &Path,
    raw_out: Option<&Path>,
    log: String,
) -> Result<PassOutput, BackendError> {
    let tree = tokio::fs::read_to_string(out).await?;
    let raw_tree = match raw_out {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };
    Ok(PassOutput {
        tree,
        raw_tree,
        log,
    })
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove output file");
        }
    }
}

#[async_trait]
impl SupportComputation for CommandComputation {
    async fn compute(
        &self,
        analysis: Analysis,
        progress: ProgressCounter,
        cancel: CancellationToken,
    ) -> Result<Artifacts, BackendError> {
        let transfer = self
            .run_pass(&analysis, Algorithm::Transfer, Some(&progress), &cancel)
            .await?;
        let classical = self
            .run_pass(&analysis, Algorithm::Classical, None, &cancel)
            .await?;

        let mut artifacts = Artifacts::new();
        artifacts.insert(TBE_NORM_TREE.to_string(), transfer.tree);
        if let Some(raw) = transfer.raw_tree {
            artifacts.insert(TBE_RAW_TREE.to_string(), raw);
        }
        artifacts.insert(TBE_LOGS.to_string(), clean_tbe_logs(&transfer.log));
        artifacts.insert(FBP_TREE.to_string(), classical.tree);
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_for_transfer_pass() {
        let comp = CommandComputation::new("/usr/bin/booster", 4);
        let cmd = comp.build_command(
            Algorithm::Transfer,
            Path::new("/in/ref.nw"),
            Path::new("/in/boot.nw"),
            Path::new("/out/t.nw"),
            Some(Path::new("/out/raw.nw")),
        );
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-a", "tbe", "-i", "/in/ref.nw", "-b", "/in/boot.nw", "-o", "/out/t.nw", "-@",
                "4", "-r", "/out/raw.nw"
            ]
        );
    }

    #[test]
    fn zero_threads_is_clamped_to_one() {
        let comp = CommandComputation::new("booster", 0);
        assert_eq!(comp.threads, 1);
    }
}
