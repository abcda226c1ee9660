//! The decorator chain around job execution.
//!
//! Every job owns a chain of executors. The innermost layer
//! ([`DefaultExecutor`]) delegates to the job's own hooks; decorating
//! layers are installed with [`wrap_job`] and delegate inward through an
//! owning [`WrapperLink`]. Unwrapping proceeds strictly outer-to-inner: a
//! layer's `cleanup` may splice the layer itself out of the chain but never
//! touches the layers inside it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::JobError;
use crate::core::job::{Job, JobHandle};
use crate::core::worker::Worker;

/// One layer of a job's execute chain.
///
/// `begin`/`end` bracket the job's run and normally delegate inward;
/// `default_begin`/`default_end` are the job-level begin/end notifications,
/// reached when the chain bottoms out, or re-entered by composite jobs to
/// fire the single begin/end spanning a whole group.
pub trait Executor: Send + Sync {
    /// Entering this layer on the way in.
    fn begin(&self, job: &JobHandle, thread: &Worker);

    /// Unwinding through this layer on the way out.
    fn end(&self, job: &JobHandle, thread: &Worker);

    /// Produce the job's payload result.
    fn run(&self, job: &JobHandle, thread: &Worker) -> Result<(), JobError> {
        job.run(job, thread)
    }

    /// Invoked after `end` when the layer is no longer needed; a wrapper
    /// may remove itself from the chain here.
    fn cleanup(&self, _job: &JobHandle, _thread: &Worker) {}

    /// The job-level begin notification.
    fn default_begin(&self, job: &JobHandle, thread: &Worker) {
        job.default_begin(job, thread);
    }

    /// The job-level end notification.
    fn default_end(&self, job: &JobHandle, thread: &Worker) {
        job.default_end(job, thread);
    }
}

/// Innermost executor: delegates straight to the job's own hooks.
#[derive(Debug, Default)]
pub struct DefaultExecutor;

impl Executor for DefaultExecutor {
    fn begin(&self, job: &JobHandle, thread: &Worker) {
        job.default_begin(job, thread);
    }

    fn end(&self, job: &JobHandle, thread: &Worker) {
        job.default_end(job, thread);
    }
}

/// Owning link from a decorating executor to the next inner layer.
///
/// Wrappers embed one of these; [`wrap_job`] fills it with the executor the
/// wrapper replaced, and the wrapper delegates its `begin`/`end` through
/// [`WrapperLink::wrapped`].
#[derive(Default)]
pub struct WrapperLink {
    wrapped: Mutex<Option<Arc<dyn Executor>>>,
}

impl WrapperLink {
    /// An empty, not yet attached link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain `previous` as the next inner layer.
    pub fn wrap(&self, previous: Arc<dyn Executor>) {
        *self.wrapped.lock() = Some(previous);
    }

    /// The next inner layer.
    ///
    /// # Panics
    /// Panics if the wrapper was never attached to a chain; using a
    /// dangling wrapper is a programmer error.
    pub fn wrapped(&self) -> Arc<dyn Executor> {
        self.wrapped
            .lock()
            .clone()
            .expect("execute wrapper is not attached to a chain")
    }
}

/// A decorating executor that knows its own link, so it can be installed
/// with [`wrap_job`].
pub trait ExecuteWrapper: Executor {
    /// The link holding this wrapper's inner layer.
    fn link(&self) -> &WrapperLink;
}

/// Install `wrapper` as the new outermost layer of `job`'s chain, retaining
/// the previous chain head as its inner layer.
pub fn wrap_job<W>(job: &dyn Job, wrapper: Arc<W>)
where
    W: ExecuteWrapper + 'static,
{
    let previous = job.core().set_executor(wrapper.clone());
    wrapper.link().wrap(previous);
}
