//! Composite jobs grouping child jobs.
//!
//! A [`Collection`] is itself a job. Dispatching it runs its (empty) body
//! first; when that body finishes, the elements are queued into the same
//! scheduler atomically. The group fires a single job-level begin when the
//! first of {body, elements} starts and a single job-level end when the
//! last element has finished or been dequeued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core::error::JobError;
use crate::core::executor::{wrap_job, ExecuteWrapper, Executor, WrapperLink};
use crate::core::job::{Job, JobCore, JobHandle, JobStatus};
use crate::core::scheduler::{QueueContext, Scheduler};
use crate::core::worker::Worker;

/// Wrapper installed on the collection's own chain so that executing the
/// collection body does not fire the job-level begin/end. The collection
/// fires them once for the whole group instead.
struct CollectionSelfWrapper {
    link: WrapperLink,
}

impl Executor for CollectionSelfWrapper {
    fn begin(&self, _job: &JobHandle, _thread: &Worker) {}

    fn end(&self, _job: &JobHandle, _thread: &Worker) {}
}

impl ExecuteWrapper for CollectionSelfWrapper {
    fn link(&self) -> &WrapperLink {
        &self.link
    }
}

/// Wrapper installed on every element and on the collection itself; it
/// reports begin/end to the owning collection, which drives the group
/// counters. The back-reference is weak and fails gracefully if the
/// collection is gone.
struct CollectionExecuteWrapper {
    link: WrapperLink,
    collection: Weak<Collection>,
}

impl Executor for CollectionExecuteWrapper {
    fn begin(&self, job: &JobHandle, thread: &Worker) {
        self.link.wrapped().begin(job, thread);
        if let Some(collection) = self.collection.upgrade() {
            collection.element_started(job, thread);
        }
    }

    fn end(&self, job: &JobHandle, thread: &Worker) {
        if let Some(collection) = self.collection.upgrade() {
            collection.element_finished(job, thread);
        }
        self.link.wrapped().end(job, thread);
    }

    fn cleanup(&self, job: &JobHandle, _thread: &Worker) {
        // drop out of the chain unless a later decoration sits above us
        job.core().unwrap_executor(self, self.link.wrapped());
    }
}

impl ExecuteWrapper for CollectionExecuteWrapper {
    fn link(&self) -> &WrapperLink {
        &self.link
    }
}

/// State guarded by the collection mutex.
struct CollectionInner {
    /// The elements, queued only after the collection body has run.
    elements: Vec<JobHandle>,
    /// The scheduler this collection is queued in, while queued or running.
    scheduler: Option<Weak<Scheduler>>,
    /// Our own shared handle, captured while executing.
    self_handle: Option<JobHandle>,
    /// True from dispatch of the body until its end hook has queued the
    /// elements.
    self_is_executing: bool,
}

/// A composite job: completes exactly when its own body and every element
/// have finished or been dequeued.
///
/// Elements may be added before the collection is queued, or from within
/// the collection body while it is still running. Dequeueing or stopping a
/// collection takes its still-queued elements with it.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use threadloom::{ClosureJob, Collection, Job, JobHandle, Scheduler};
///
/// let scheduler = Scheduler::with_defaults();
/// let done = Arc::new(AtomicUsize::new(0));
///
/// let collection = Collection::new();
/// for _ in 0..3 {
///     let done = Arc::clone(&done);
///     collection.add_job(ClosureJob::new(move |_job, _thread| {
///         done.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }));
/// }
/// let handle: JobHandle = collection.clone();
/// scheduler.enqueue(vec![handle]);
/// scheduler.finish();
/// scheduler.shutdown();
/// assert_eq!(done.load(Ordering::SeqCst), 3);
/// assert!(collection.success());
/// ```
pub struct Collection {
    core: JobCore,
    inner: Mutex<CollectionInner>,
    /// Remaining units: the elements plus the collection body itself.
    /// Initialized once, before the elements become visible to workers.
    job_counter: AtomicUsize,
    /// Units (body or element) whose begin has fired.
    jobs_started: AtomicUsize,
}

impl Collection {
    /// An empty collection with priority 0.
    pub fn new() -> Arc<Self> {
        Self::with_priority(0)
    }

    /// An empty collection with the given queueing priority.
    pub fn with_priority(priority: i32) -> Arc<Self> {
        let collection = Arc::new(Self {
            core: JobCore::new(priority),
            inner: Mutex::new(CollectionInner {
                elements: Vec::new(),
                scheduler: None,
                self_handle: None,
                self_is_executing: false,
            }),
            job_counter: AtomicUsize::new(0),
            jobs_started: AtomicUsize::new(0),
        });
        // innermost: keep the body's execute from firing job-level
        // begin/end; above it: report the body to the group counters
        wrap_job(
            &*collection,
            Arc::new(CollectionSelfWrapper {
                link: WrapperLink::new(),
            }),
        );
        wrap_job(
            &*collection,
            Arc::new(CollectionExecuteWrapper {
                link: WrapperLink::new(),
                collection: Arc::downgrade(&collection),
            }),
        );
        collection
    }

    /// Append `job` to the collection.
    ///
    /// Allowed while the collection is not yet queued, or from within its
    /// body while that is still executing.
    ///
    /// # Panics
    /// Panics when called after the collection has started completing;
    /// that is a programmer error.
    pub fn add_job(self: &Arc<Self>, job: JobHandle) {
        let mut inner = self.inner.lock();
        assert!(
            inner.scheduler.is_none() || inner.self_is_executing,
            "jobs can only be added before queueing or while the collection body runs"
        );
        wrap_job(
            &*job,
            Arc::new(CollectionExecuteWrapper {
                link: WrapperLink::new(),
                collection: Arc::downgrade(self),
            }),
        );
        inner.elements.push(job);
    }

    /// Number of elements currently in the collection.
    pub fn job_count(&self) -> usize {
        self.inner.lock().elements.len()
    }

    /// Remove the collection from its scheduler or, if its body already
    /// ran, dequeue every element that has not started yet. Running
    /// elements keep running to their own termination.
    pub fn stop(self: &Arc<Self>) {
        let scheduler = self.inner.lock().scheduler.clone();
        let Some(scheduler) = scheduler.and_then(|weak| weak.upgrade()) else {
            return;
        };
        debug!("stopping collection");
        let self_handle: JobHandle = self.clone();
        if !scheduler.dequeue(&self_handle) {
            self.dequeue_elements(&scheduler);
        }
    }

    // --- wrapper callbacks ------------------------------------------------

    /// An element (or the body) is about to run.
    fn element_started(&self, _job: &JobHandle, thread: &Worker) {
        if self.jobs_started.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        // first start in the group: the single outer begin
        let (executor, self_handle) = {
            let inner = self.inner.lock();
            (self.core.executor(), inner.self_handle.clone())
        };
        if let Some(self_handle) = self_handle {
            trace!("collection started");
            executor.default_begin(&self_handle, thread);
        }
    }

    /// An element (or the body) finished running.
    fn element_finished(&self, _job: &JobHandle, thread: &Worker) {
        let mut inner = self.inner.lock();
        let self_handle = inner.self_handle.clone();
        debug_assert!(self_handle.is_some());
        if inner.self_is_executing {
            // the body always finishes first; its elements become visible
            // to workers only now, after the counter is initialized
            self.enqueue_elements_locked(&mut inner);
            inner.self_is_executing = false;
        }
        let remaining = self.job_counter.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(remaining, "collection element finished");
        if remaining == 0 {
            self.final_cleanup_locked(&mut inner);
            drop(inner);
            if let Some(self_handle) = self_handle {
                // the single outer end, strictly after every element's end
                self.core.executor().default_end(&self_handle, thread);
            }
        }
    }

    // --- internals --------------------------------------------------------

    /// Queue the elements into the owning scheduler. Collection mutex held;
    /// the engine mutex is taken by the enqueue itself.
    fn enqueue_elements_locked(&self, inner: &mut CollectionInner) {
        self.job_counter
            .store(inner.elements.len() + 1, Ordering::Release);
        trace!(elements = inner.elements.len(), "queueing collection elements");
        if let Some(scheduler) = inner.scheduler.as_ref().and_then(Weak::upgrade) {
            scheduler.enqueue(inner.elements.clone());
        }
    }

    /// Dequeue still-queued elements through the public API. Called with no
    /// lock held (stop path); running elements are left alone.
    fn dequeue_elements(&self, scheduler: &Arc<Scheduler>) {
        let elements = self.inner.lock().elements.clone();
        for element in &elements {
            if scheduler.dequeue(element)
                && self.job_counter.fetch_sub(1, Ordering::AcqRel) == 1
            {
                // dequeues alone exhausted the group with nothing running;
                // there is no worker context for an outer end
                let mut inner = self.inner.lock();
                self.final_cleanup_locked(&mut inner);
            }
        }
    }

    /// Dequeue still-queued elements through the already-locked queue view
    /// (engine-side dequeue of the whole collection).
    fn dequeue_elements_locked(&self, inner: &mut CollectionInner, queue: &mut QueueContext<'_>) {
        trace!(
            elements = inner.elements.len(),
            "dequeueing collection elements"
        );
        for index in 0..inner.elements.len() {
            let element = inner.elements[index].clone();
            if queue.dequeue(&element) && self.job_counter.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.final_cleanup_locked(inner);
            }
        }
    }

    /// Release policy reservations, mark the group successful, and detach
    /// from the scheduler. Runs exactly once per completed lifecycle.
    fn final_cleanup_locked(&self, inner: &mut CollectionInner) {
        debug!("collection complete");
        if let Some(self_handle) = &inner.self_handle {
            for policy in self.core.queue_policies() {
                policy.free(self_handle);
            }
        }
        self.core.set_status(JobStatus::Success);
        inner.scheduler = None;
        inner.self_handle = None;
    }
}

impl Job for Collection {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _self_job: &JobHandle, _thread: &Worker) -> Result<(), JobError> {
        // the group's work is its elements
        Ok(())
    }

    fn about_to_be_queued(&self, queue: &mut QueueContext<'_>) {
        let mut inner = self.inner.lock();
        assert!(
            inner.scheduler.is_none(),
            "a collection must not be queued twice"
        );
        inner.scheduler = Some(Arc::downgrade(queue.scheduler()));
    }

    fn about_to_be_dequeued(&self, queue: &mut QueueContext<'_>) {
        let mut inner = self.inner.lock();
        self.dequeue_elements_locked(&mut inner, queue);
        inner.scheduler = None;
    }

    fn execute(&self, self_job: &JobHandle, thread: &Worker) {
        {
            let mut inner = self.inner.lock();
            debug_assert!(inner.self_handle.is_none());
            debug_assert!(inner.scheduler.is_some());
            inner.self_handle = Some(self_job.clone());
            inner.self_is_executing = true; // reset in element_finished
        }
        // the execute chain without the terminal-status fold of
        // `default_execute`: a group is Success only once the
        // remaining-counter reaches zero, in final cleanup
        let executor = self.core.executor();
        executor.begin(self_job, thread);
        self.core.set_status(JobStatus::Running);
        let _ = executor.run(self_job, thread);
        executor.end(self_job, thread);
        executor.cleanup(self_job, thread);
    }

    fn default_begin(&self, _self_job: &JobHandle, _thread: &Worker) {}

    fn default_end(&self, _self_job: &JobHandle, _thread: &Worker) {
        // final_cleanup released the policy reservations already
    }
}
