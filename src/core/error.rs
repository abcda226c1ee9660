//! Error types for job execution.

use thiserror::Error;

/// Outcomes a job's `run` may signal to the execute chain.
///
/// These are folded into the job's terminal [`JobStatus`] by the execute
/// flow; the scheduler never surfaces them to submitters.
///
/// [`JobStatus`]: crate::core::job::JobStatus
#[derive(Debug, Error)]
pub enum JobError {
    /// A cooperative abort request took effect.
    #[error("job aborted: {0}")]
    Aborted(String),
    /// The job's own run signalled failure.
    #[error("job failed: {0}")]
    Failed(String),
}
