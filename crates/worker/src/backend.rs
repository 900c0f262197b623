//! Compute backend selection from environment variables.
//!
//! | Variable                    | Default   |
//! |-----------------------------|-----------|
//! | `BACKEND`                   | `local`   |
//! | `BOOSTER_BIN`               | `booster` |
//! | `REMOTE_URL`                | required for `remote` |
//! | `REMOTE_API_KEY`            |           |
//! | `REMOTE_POLL_INTERVAL_SECS` | `10`      |
//! | `REMOTE_MEM_LIMIT`          | unbounded |
//!
//! `REMOTE_MEM_LIMIT` (bytes) and the engine timeout cap the estimated
//! footprint of tree-building analyses sent to the remote system.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use phylo_compute::{
    CommandComputation, ComputeBackend, HttpWorkflowApi, LocalBackend, RemoteBackend,
    ResourceLimits,
};

const DEFAULT_BOOSTER_BIN: &str = "booster";
const DEFAULT_REMOTE_POLL_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    Local {
        program: String,
    },
    Remote {
        url: String,
        api_key: Option<String>,
        poll_interval: Duration,
        memory_limit: Option<u64>,
    },
}

impl BackendSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Parse settings from an arbitrary variable source. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        match get("BACKEND").as_deref().unwrap_or("local") {
            "local" => Ok(Self::Local {
                program: get("BOOSTER_BIN").unwrap_or_else(|| DEFAULT_BOOSTER_BIN.to_string()),
            }),
            "remote" => {
                let url = get("REMOTE_URL").context("REMOTE_URL must be set when BACKEND=remote")?;
                let poll_secs = match get("REMOTE_POLL_INTERVAL_SECS") {
                    Some(v) => v
                        .trim()
                        .parse::<u64>()
                        .with_context(|| format!("Invalid REMOTE_POLL_INTERVAL_SECS: {v:?}"))?,
                    None => DEFAULT_REMOTE_POLL_SECS,
                };
                if poll_secs == 0 {
                    bail!("REMOTE_POLL_INTERVAL_SECS must be > 0");
                }
                let memory_limit = match get("REMOTE_MEM_LIMIT") {
                    Some(v) => Some(
                        v.trim()
                            .parse::<u64>()
                            .with_context(|| format!("Invalid REMOTE_MEM_LIMIT: {v:?}"))?,
                    ),
                    None => None,
                };
                Ok(Self::Remote {
                    url,
                    api_key: get("REMOTE_API_KEY"),
                    poll_interval: Duration::from_secs(poll_secs),
                    memory_limit: memory_limit.filter(|&m| m > 0),
                })
            }
            other => bail!("Unknown BACKEND {other:?}, expected \"local\" or \"remote\""),
        }
    }

    /// Instantiate the backend. `job_threads` is passed to the local tool;
    /// `timeout` also bounds the estimated runtime of remote analyses.
    pub fn build(self, job_threads: usize, timeout: Option<Duration>) -> Arc<dyn ComputeBackend> {
        match self {
            Self::Local { program } => {
                tracing::info!(program = %program, threads = job_threads, "Using local support tool");
                Arc::new(LocalBackend::new(CommandComputation::new(program, job_threads)))
            }
            Self::Remote {
                url,
                api_key,
                poll_interval,
                memory_limit,
            } => {
                tracing::info!(
                    url = %url,
                    poll_secs = poll_interval.as_secs(),
                    memory_limit = memory_limit.unwrap_or(0),
                    "Using remote workflow system",
                );
                Arc::new(
                    RemoteBackend::new(HttpWorkflowApi::new(url, api_key))
                        .with_poll_interval(poll_interval)
                        .with_limits(ResourceLimits {
                            memory_bytes: memory_limit,
                            runtime: timeout,
                        }),
                )
            }
        }
    }
}
