//! Engine configuration loaded from environment variables.

use std::time::Duration;

use phylo_core::resources::{available_cpus, validate_worker_capacity};
use phylo_core::CoreError;

/// Queue sizes below this are accepted but logged as a warning.
const SMALL_QUEUE_WARNING: usize = 100;

/// Configuration errors. Fatal at engine construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },

    #[error("The queue size must be set to a value >0")]
    QueueSize,

    #[error("The progress interval must be >0")]
    ProgressInterval,

    #[error(transparent)]
    Capacity(#[from] CoreError),
}

/// Sizing and timing of the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of in-flight (queued or running) analyses.
    pub queue_capacity: usize,
    /// Number of worker tasks.
    pub workers: usize,
    /// Threads each local computation uses. Only used for the CPU check.
    pub job_threads: usize,
    /// Per-analysis timeout measured from submission. `None` = unbounded.
    pub timeout: Option<Duration>,
    /// Period of the progress persistence task.
    pub progress_interval: Duration,
    /// Consecutive failed status checks before an analysis is failed.
    /// `0` retries forever.
    pub max_poll_failures: u32,
    /// Analyses that ended more than this many days ago are purged at
    /// startup. `0` keeps everything.
    pub retention_days: u32,
    /// How long `shutdown` waits for workers before aborting them.
    pub shutdown_grace: Duration,
    /// CPU count to validate against instead of asking the host.
    pub cpu_hint: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            workers: 1,
            job_threads: 1,
            timeout: None,
            progress_interval: Duration::from_secs(4),
            max_poll_failures: 30,
            retention_days: 0,
            shutdown_grace: Duration::from_secs(10),
            cpu_hint: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `QUEUE_SIZE`             | `10`    |
    /// | `RUNNERS`                | `1`     |
    /// | `JOB_THREADS`            | `1`     |
    /// | `JOB_TIMEOUT_SECS`       | `0`     |
    /// | `PROGRESS_INTERVAL_SECS` | `4`     |
    /// | `MAX_POLL_FAILURES`      | `30`    |
    /// | `RETENTION_DAYS`         | `0`     |
    /// | `SHUTDOWN_GRACE_SECS`    | `10`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs: u64 = env_or("JOB_TIMEOUT_SECS", 0)?;
        Ok(Self {
            queue_capacity: env_or("QUEUE_SIZE", defaults.queue_capacity)?,
            workers: env_or("RUNNERS", defaults.workers)?,
            job_threads: env_or("JOB_THREADS", defaults.job_threads)?,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            progress_interval: Duration::from_secs(env_or(
                "PROGRESS_INTERVAL_SECS",
                defaults.progress_interval.as_secs(),
            )?),
            max_poll_failures: env_or("MAX_POLL_FAILURES", defaults.max_poll_failures)?,
            retention_days: env_or("RETENTION_DAYS", defaults.retention_days)?,
            shutdown_grace: Duration::from_secs(env_or(
                "SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )?),
            cpu_hint: None,
        })
    }

    /// Check the configuration. The worker count is checked against the
    /// host CPUs only when the backend is CPU-bound.
    pub fn validate(&self, cpu_bound: bool) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::QueueSize);
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::ProgressInterval);
        }
        if self.queue_capacity < SMALL_QUEUE_WARNING {
            tracing::warn!(
                queue_size = self.queue_capacity,
                "The queue size is <{SMALL_QUEUE_WARNING}, it may be a problem for users"
            );
        }
        if cpu_bound {
            let cpus = self.cpu_hint.unwrap_or_else(available_cpus);
            validate_worker_capacity(self.workers, self.job_threads, cpus)?;
        } else if self.workers == 0 {
            return Err(CoreError::Validation("The number of runners must be > 0".into()).into());
        }
        Ok(())
    }
}

/// Parse `var` if set and non-empty, otherwise return `default`.
fn env_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { var, value }),
        _ => Ok(default),
    }
}
