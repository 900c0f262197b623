//! Compute-capacity checks for the worker pool.
//!
//! Pure functions so the sizing rule can be tested without touching the
//! host.

use crate::error::CoreError;

/// CPUs kept free for the service itself (request handling, polling).
pub const RESERVED_CPUS: usize = 1;

/// Number of CPUs the host reports, falling back to 1 when unknown.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Check that `workers` jobs using `threads_per_job` threads each fit on
/// `cpus` CPUs alongside the reserved ones.
pub fn validate_worker_capacity(
    workers: usize,
    threads_per_job: usize,
    cpus: usize,
) -> Result<(), CoreError> {
    if workers == 0 {
        return Err(CoreError::Validation(
            "The number of runners must be > 0".to_string(),
        ));
    }
    if threads_per_job == 0 {
        return Err(CoreError::Validation(
            "The number of threads per job must be > 0".to_string(),
        ));
    }
    let needed = workers
        .saturating_mul(threads_per_job)
        .saturating_add(RESERVED_CPUS);
    if needed > cpus {
        return Err(CoreError::Validation(format!(
            "Your system does not have enough cpus to run the server + {workers} runners \
             with {threads_per_job} threads each ({needed} needed, {cpus} available)"
        )));
    }
    Ok(())
}
