//! The abstract work unit executed by the scheduler.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::error::JobError;
use crate::core::executor::{DefaultExecutor, Executor};
use crate::core::policy::QueuePolicy;
use crate::core::scheduler::QueueContext;
use crate::core::worker::Worker;

/// Shared handle to a job.
///
/// Jobs are shared between the submitter and the engine; identity is
/// allocation identity (`Arc::ptr_eq`). A job is present in at most one
/// scheduler's queue at a time.
pub type JobHandle = Arc<dyn Job>;

/// Lifecycle status of a job.
///
/// Transitions run `New → Queued → Running → {Success | Failed | Aborted}`;
/// dequeueing an unrun job resets it to `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobStatus {
    /// Not yet handed to a scheduler.
    New = 0,
    /// Waiting in a scheduler's assignment list.
    Queued = 1,
    /// Executing on a worker.
    Running = 2,
    /// Finished; the run completed normally.
    Success = 3,
    /// Finished; the run reported failure.
    Failed = 4,
    /// Finished; a cooperative abort took effect.
    Aborted = 5,
}

impl JobStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::New,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Success,
            4 => Self::Failed,
            _ => Self::Aborted,
        }
    }
}

/// Bookkeeping embedded by every job implementation.
///
/// Holds the status cell, the head of the execute-wrapper chain, the
/// attached queue policies, and the cooperative abort flag. Implementations
/// of [`Job`] store one of these and return it from [`Job::core`].
pub struct JobCore {
    status: AtomicU8,
    priority: i32,
    executor: Mutex<Arc<dyn Executor>>,
    policies: Mutex<Vec<Arc<dyn QueuePolicy>>>,
    abort_requested: AtomicBool,
}

impl Default for JobCore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl JobCore {
    /// Bookkeeping for a job with the given queueing priority.
    pub fn new(priority: i32) -> Self {
        Self {
            status: AtomicU8::new(JobStatus::New as u8),
            priority,
            executor: Mutex::new(Arc::new(DefaultExecutor)),
            policies: Mutex::new(Vec::new()),
            abort_requested: AtomicBool::new(false),
        }
    }

    /// Current status.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Overwrite the status.
    pub fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// The queueing priority this core was created with.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Swap the outermost executor, returning the previous chain head.
    pub fn set_executor(&self, executor: Arc<dyn Executor>) -> Arc<dyn Executor> {
        std::mem::replace(&mut *self.executor.lock(), executor)
    }

    /// The current outermost executor.
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.executor.lock().clone()
    }

    /// Splice `layer` out of the chain if it is still the outermost
    /// executor, restoring `inner` as the chain head.
    ///
    /// Returns whether the splice happened; a layer that has been decorated
    /// over in the meantime is left in place.
    pub fn unwrap_executor(&self, layer: &dyn Executor, inner: Arc<dyn Executor>) -> bool {
        let mut slot = self.executor.lock();
        if std::ptr::addr_eq(Arc::as_ptr(&*slot), layer as *const dyn Executor) {
            *slot = inner;
            true
        } else {
            false
        }
    }

    /// Append `policy` to the admission policies consulted at dispatch.
    pub fn assign_queue_policy(&self, policy: Arc<dyn QueuePolicy>) {
        self.policies.lock().push(policy);
    }

    /// Remove a previously assigned policy (by identity).
    pub fn remove_queue_policy(&self, policy: &Arc<dyn QueuePolicy>) {
        self.policies
            .lock()
            .retain(|attached| !Arc::ptr_eq(attached, policy));
    }

    /// Snapshot of the attached policies, in assignment order.
    pub fn queue_policies(&self) -> Vec<Arc<dyn QueuePolicy>> {
        self.policies.lock().clone()
    }

    /// Raise the cooperative abort flag.
    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::Release);
    }

    /// Whether an abort has been requested. Long-running `run` bodies are
    /// expected to poll this and bail out with [`JobError::Aborted`].
    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }
}

/// The work-unit contract required by the scheduler.
///
/// Implementations embed a [`JobCore`] and return it from [`core`];
/// everything else has working defaults. `run` carries the payload.
///
/// [`core`]: Job::core
pub trait Job: Send + Sync {
    /// The shared bookkeeping for this job.
    fn core(&self) -> &JobCore;

    /// The job's payload. Runs on a worker thread with no scheduler lock
    /// held. `self_job` is the shared handle this job was dispatched under.
    fn run(&self, self_job: &JobHandle, thread: &Worker) -> Result<(), JobError>;

    /// Queueing priority; higher runs earlier.
    fn priority(&self) -> i32 {
        self.core().priority()
    }

    /// Current status.
    fn status(&self) -> JobStatus {
        self.core().status()
    }

    /// Overwrite the status.
    fn set_status(&self, status: JobStatus) {
        self.core().set_status(status);
    }

    /// True once the job has finished without failure.
    fn success(&self) -> bool {
        self.status() == JobStatus::Success
    }

    /// The admission policies consulted at dispatch, in order.
    fn queue_policies(&self) -> Vec<Arc<dyn QueuePolicy>> {
        self.core().queue_policies()
    }

    /// Called exactly once, under the engine mutex, immediately before the
    /// job is inserted into the queue.
    fn about_to_be_queued(&self, _queue: &mut QueueContext<'_>) {}

    /// Called exactly once, under the engine mutex, when the job is removed
    /// from the queue without having run.
    fn about_to_be_dequeued(&self, _queue: &mut QueueContext<'_>) {}

    /// Ask the job to terminate early. Cooperative: the running `run` body
    /// is expected to poll [`JobCore::abort_requested`].
    fn request_abort(&self) {
        self.core().request_abort();
    }

    /// Run the job through its execute-wrapper chain.
    fn execute(&self, self_job: &JobHandle, thread: &Worker) {
        default_execute(self, self_job, thread);
    }

    /// Job-level begin notification, reached through the innermost executor
    /// (or fired once per group by composite jobs).
    fn default_begin(&self, _self_job: &JobHandle, _thread: &Worker) {}

    /// Job-level end notification; returns the policy reservations held
    /// since dispatch.
    fn default_end(&self, self_job: &JobHandle, _thread: &Worker) {
        free_queue_policy_resources(self, self_job);
    }
}

/// Return every policy reservation held by a finished job.
pub fn free_queue_policy_resources<J: Job + ?Sized>(job: &J, self_job: &JobHandle) {
    for policy in job.core().queue_policies() {
        policy.free(self_job);
    }
}

/// The canonical execute flow: the outermost `begin`, the job's `run`, then
/// the unwind through `end` and `cleanup`, folding the run outcome into the
/// job's terminal status.
///
/// Factored out so jobs overriding [`Job::execute`] can reuse it after
/// their own bookkeeping.
pub fn default_execute<J: Job + ?Sized>(job: &J, self_job: &JobHandle, thread: &Worker) {
    let executor = job.core().executor();
    executor.begin(self_job, thread);
    job.set_status(JobStatus::Running);
    match executor.run(self_job, thread) {
        Ok(()) => {
            if job.status() == JobStatus::Running {
                job.set_status(JobStatus::Success);
            }
        }
        Err(JobError::Aborted(reason)) => {
            debug!(reason = %reason, "job aborted");
            job.set_status(JobStatus::Aborted);
        }
        Err(JobError::Failed(reason)) => {
            debug!(reason = %reason, "job failed");
            job.set_status(JobStatus::Failed);
        }
    }
    executor.end(self_job, thread);
    executor.cleanup(self_job, thread);
}

/// A job wrapping a closure, for ad-hoc work units.
///
/// ```
/// use threadloom::{ClosureJob, Job, JobHandle};
///
/// let job: JobHandle = ClosureJob::with_priority(5, |_job, _thread| Ok(()));
/// assert_eq!(job.priority(), 5);
/// ```
pub struct ClosureJob<F>
where
    F: Fn(&JobHandle, &Worker) -> Result<(), JobError> + Send + Sync + 'static,
{
    core: JobCore,
    body: F,
}

impl<F> ClosureJob<F>
where
    F: Fn(&JobHandle, &Worker) -> Result<(), JobError> + Send + Sync + 'static,
{
    /// Wrap `body` as a job with priority 0.
    pub fn new(body: F) -> Arc<Self> {
        Self::with_priority(0, body)
    }

    /// Wrap `body` as a job with the given priority.
    pub fn with_priority(priority: i32, body: F) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(priority),
            body,
        })
    }
}

impl<F> Job for ClosureJob<F>
where
    F: Fn(&JobHandle, &Worker) -> Result<(), JobError> + Send + Sync + 'static,
{
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, self_job: &JobHandle, thread: &Worker) -> Result<(), JobError> {
        (self.body)(self_job, thread)
    }
}
