//! The scheduler engine: assignment list, worker inventory, dispatch.
//!
//! One non-recursive mutex guards the queue, the inventory, and the active
//! count. Two condvars coordinate the rest: `job_available` parks idle
//! workers and is signalled on enqueue, resume, and shutdown;
//! `job_finished` wakes `finish()` callers and policy re-evaluation on job
//! completion and dequeue. Workers never hold the mutex while executing a
//! job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::config::SchedulerConfig;
use crate::core::events::EventSink;
use crate::core::job::{Job, JobHandle, JobStatus};
use crate::core::policy::QueuePolicy;
use crate::core::state::{AtomicState, StateId};
use crate::core::worker::Worker;
use crate::util::semaphore::Semaphore;

/// Bounded wait inside `finish` before rebroadcasting `job_available` to
/// cover missed wake-ups.
#[cfg(debug_assertions)]
const FINISH_WAIT: Duration = Duration::from_millis(500);
#[cfg(not(debug_assertions))]
const FINISH_WAIT: Duration = Duration::from_millis(50);

/// Interval between wake broadcasts while waiting for a worker to exit
/// during shutdown.
const SHUTDOWN_RETRY: Duration = Duration::from_millis(100);

/// A worker plus the OS thread it runs on.
struct WorkerHandle {
    worker: Arc<Worker>,
    join: JoinHandle<()>,
}

/// Mutable engine state guarded by the engine mutex.
struct EngineInner {
    /// Queued jobs, non-increasing by priority, FIFO within equal priority.
    assignments: Vec<JobHandle>,
    /// Worker threads, grown lazily, never shrunk before shutdown.
    inventory: Vec<WorkerHandle>,
    /// Workers currently executing a job.
    active: usize,
    /// Inventory growth cap.
    inventory_max: usize,
}

impl EngineInner {
    fn is_idle(&self) -> bool {
        self.assignments.is_empty() && self.active == 0
    }
}

/// The concurrent job scheduler.
///
/// Created with [`Scheduler::new`] and shared as an `Arc`; submitters and
/// workers all operate through the same handle. Every public operation
/// dispatches through the current lifecycle state, so calls that are
/// invalid in a state (for instance `enqueue` after [`shutdown`]) are
/// silent no-ops rather than errors.
///
/// `shutdown()` must be called from the thread that created the scheduler
/// before the handle is dropped; otherwise worker threads stay parked and
/// are detached.
///
/// [`shutdown`]: Scheduler::shutdown
pub struct Scheduler {
    inner: Mutex<EngineInner>,
    job_available: Condvar,
    job_finished: Condvar,
    state: AtomicState,
    startup: Semaphore,
    created_threads: AtomicUsize,
    observers: Mutex<Vec<Arc<dyn EventSink>>>,
    config: SchedulerConfig,
    owner: ThreadId,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(SchedulerConfig::default())
    }

    /// Create a scheduler from `config`.
    ///
    /// Worker threads are not created eagerly; the inventory grows as jobs
    /// arrive, up to `config.max_threads`.
    ///
    /// # Panics
    /// Panics if the configuration fails validation; an invalid
    /// configuration is a programmer error.
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        if let Err(reason) = config.validate() {
            panic!("invalid scheduler configuration: {reason}");
        }
        let scheduler = Arc::new(Self {
            inner: Mutex::new(EngineInner {
                assignments: Vec::new(),
                inventory: Vec::new(),
                active: 0,
                inventory_max: config.max_threads,
            }),
            job_available: Condvar::new(),
            job_finished: Condvar::new(),
            state: AtomicState::new(StateId::InConstruction),
            startup: Semaphore::new(),
            created_threads: AtomicUsize::new(0),
            observers: Mutex::new(Vec::new()),
            owner: thread::current().id(),
            config,
        });
        {
            let mut inner = scheduler.inner.lock();
            scheduler.set_state_locked(&mut inner, StateId::WorkingHard);
        }
        info!(
            max_threads = scheduler.config.max_threads,
            "scheduler ready"
        );
        scheduler
    }

    /// Current lifecycle state (lock-free read).
    pub fn state(&self) -> StateId {
        self.state.load()
    }

    /// Queue a batch of jobs for execution.
    ///
    /// Each job is inserted in priority order (higher first, FIFO within a
    /// priority), marked [`JobStatus::Queued`], and the inventory grows by
    /// up to one worker per job. A no-op once the scheduler is shutting
    /// down.
    ///
    /// # Panics
    /// Panics if a job is already queued or running; queueing a job into
    /// two engines is a programmer error.
    pub fn enqueue(self: &Arc<Self>, jobs: Vec<JobHandle>) {
        let mut inner = self.inner.lock();
        if !self.state().accepts_jobs() {
            debug!(state = self.state().name(), "enqueue ignored");
            return;
        }
        self.enqueue_under_lock(&mut inner, jobs);
    }

    /// Remove `job` from the queue if it is still waiting; returns whether
    /// it was found.
    ///
    /// The job's `about_to_be_dequeued` hook runs under the engine mutex
    /// and its status is reset to [`JobStatus::New`]. `job_finished` is
    /// broadcast: from the queue's point of view a dequeued job is just as
    /// finished.
    pub fn dequeue(self: &Arc<Self>, job: &JobHandle) -> bool {
        let mut inner = self.inner.lock();
        if self.state() == StateId::Destructed {
            return false;
        }
        self.dequeue_under_lock(&mut inner, job)
    }

    /// Remove every queued job, notifying each via `about_to_be_dequeued`.
    pub fn dequeue_all(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if self.state() == StateId::Destructed {
            return;
        }
        debug!(queue_length = inner.assignments.len(), "dequeueing all jobs");
        while let Some(job) = inner.assignments.first().cloned() {
            self.dequeue_under_lock(&mut inner, &job);
        }
    }

    /// Block the caller until the queue is empty and no job is running.
    ///
    /// Waits are bounded; on timeout the scheduler rebroadcasts
    /// `job_available` to cover missed wake-ups and re-waits. Only sensible
    /// in `WorkingHard`; in any other state the call logs and returns.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        while !inner.is_idle() {
            if self.state() != StateId::WorkingHard {
                warn!(state = self.state().name(), "finish called outside working state");
                return;
            }
            debug!(
                queue_length = inner.assignments.len(),
                active = inner.active,
                "finish: waiting for idle"
            );
            if self.job_finished.wait_for(&mut inner, FINISH_WAIT).timed_out() {
                trace!("finish: wait timed out, waking threads");
                self.reschedule();
            }
        }
        debug!("finish: idle");
    }

    /// Request suspension.
    ///
    /// Already-running jobs continue and new enqueues are still accepted,
    /// but nothing further is handed out. The state becomes `Suspended`
    /// (and the `suspended` event fires) once the last active job
    /// completes, or immediately if nothing is active.
    pub fn suspend(&self) {
        let mut inner = self.inner.lock();
        if self.state() != StateId::WorkingHard {
            debug!(state = self.state().name(), "suspend ignored");
            return;
        }
        self.set_state_locked(&mut inner, StateId::Suspending);
        if inner.active == 0 {
            self.set_state_locked(&mut inner, StateId::Suspended);
        }
    }

    /// Resume dispatch after a suspension.
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        match self.state() {
            StateId::Suspended | StateId::Suspending => {
                self.set_state_locked(&mut inner, StateId::WorkingHard);
            }
            other => debug!(state = other.name(), "resume ignored"),
        }
    }

    /// Drain the queue, join every worker thread, and retire the engine.
    ///
    /// After `shutdown` returns the state is terminal (`Destructed`) and
    /// every queue operation is a silent no-op. Idempotent.
    ///
    /// # Panics
    /// Panics when called from any thread other than the one that created
    /// the scheduler; that is a programmer error.
    pub fn shutdown(self: &Arc<Self>) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "shutdown may only be called from the scheduler's owning thread"
        );
        if matches!(self.state(), StateId::ShuttingDown | StateId::Destructed) {
            return;
        }
        debug!("shutdown: draining inventory");
        // every thread ever created must have entered its run loop before
        // teardown starts, or we would race workers mid-launch
        self.startup
            .acquire(self.created_threads.load(Ordering::Acquire));
        self.finish();
        self.suspend();
        {
            let mut inner = self.inner.lock();
            self.set_state_locked(&mut inner, StateId::ShuttingDown);
        }
        self.reschedule();
        self.job_finished.notify_all();

        loop {
            let handle = {
                let mut inner = self.inner.lock();
                if inner.inventory.is_empty() {
                    break;
                }
                inner.inventory.remove(0)
            };
            // a thread may still be between "found no job" and parking;
            // keep waking it until it observes the shutdown
            while !handle.join.is_finished() {
                self.reschedule();
                self.job_finished.notify_all();
                thread::sleep(SHUTDOWN_RETRY);
                if !handle.join.is_finished() {
                    warn!(
                        worker_id = handle.worker.id(),
                        "worker did not exit as expected, retrying"
                    );
                }
            }
            let _ = handle.join.join();
            self.emit(|sink| sink.thread_exited(handle.worker.id()));
            debug!(worker_id = handle.worker.id(), "worker thread exited");
        }

        {
            let mut inner = self.inner.lock();
            debug_assert!(inner.inventory.is_empty());
            self.set_state_locked(&mut inner, StateId::Destructed);
        }
        info!("shutdown complete");
    }

    /// Update the inventory growth cap. Workers already running are not
    /// stopped; the cap applies to future growth.
    ///
    /// # Panics
    /// Panics if `cap` is zero: the inventory must be allowed at least one
    /// thread.
    pub fn set_max_threads(&self, cap: usize) {
        assert!(cap > 0, "thread inventory size has to be larger than zero");
        let mut inner = self.inner.lock();
        if matches!(self.state(), StateId::ShuttingDown | StateId::Destructed) {
            return;
        }
        inner.inventory_max = cap;
    }

    /// The inventory growth cap.
    pub fn max_threads(&self) -> usize {
        self.inner.lock().inventory_max
    }

    /// Number of worker threads currently in the inventory.
    pub fn current_threads(&self) -> usize {
        self.inner.lock().inventory.len()
    }

    /// Number of queued jobs.
    pub fn queue_length(&self) -> usize {
        self.inner.lock().assignments.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().assignments.is_empty()
    }

    /// Whether the queue is empty and no job is running.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().is_idle()
    }

    /// Fan a cooperative abort request out to every worker, which forwards
    /// it to its currently running job.
    pub fn request_abort(&self) {
        let inner = self.inner.lock();
        if self.state() == StateId::Destructed {
            return;
        }
        for handle in &inner.inventory {
            handle.worker.request_abort();
        }
    }

    /// Attach a sink receiving scheduler events.
    ///
    /// Sinks are called with internal locks held and must not call back
    /// into the scheduler synchronously.
    pub fn register_observer(&self, sink: Arc<dyn EventSink>) {
        self.observers.lock().push(sink);
    }

    /// Wake every parked worker to re-evaluate the queue.
    pub fn reschedule(&self) {
        self.job_available.notify_all();
    }

    /// Log the current assignment list at debug level.
    pub fn dump_jobs(&self) {
        let inner = self.inner.lock();
        debug!(queue_length = inner.assignments.len(), "assignment list");
        for (index, job) in inner.assignments.iter().enumerate() {
            debug!(
                index,
                priority = job.priority(),
                status = ?job.status(),
                "queued job"
            );
        }
    }

    // --- worker-facing surface -------------------------------------------

    /// First call a worker makes after its thread launch completed.
    pub(crate) fn thread_entered_run(&self, worker: &Arc<Worker>) {
        self.startup.release(1);
        self.emit(|sink| sink.thread_started(worker.id()));
    }

    /// Hand the next eligible job to `worker`, parking it while nothing is
    /// available. Returns `None` only when the worker should exit.
    ///
    /// `was_busy` reports whether the previous iteration ran a job; the
    /// active count is settled here, under the engine mutex, before any
    /// dispatch decision.
    pub(crate) fn apply_for_work(
        &self,
        worker: &Arc<Worker>,
        mut was_busy: bool,
    ) -> Option<JobHandle> {
        loop {
            match self.state() {
                StateId::WorkingHard => {
                    if let Some(job) =
                        self.take_first_available_job(worker, was_busy, true, false)
                    {
                        return Some(job);
                    }
                }
                StateId::Suspending => {
                    self.take_first_available_job(worker, was_busy, true, true);
                    self.wait_for_available_job(worker);
                }
                StateId::Suspended => {
                    self.wait_for_available_job(worker);
                }
                StateId::ShuttingDown => {
                    // settle the active count, then exit
                    self.take_first_available_job(worker, was_busy, false, true);
                    return None;
                }
                StateId::InConstruction | StateId::Destructed => return None,
            }
            was_busy = false;
        }
    }

    pub(crate) fn notify_thread_busy(&self, worker: &Worker, job: &JobHandle) {
        self.emit(|sink| sink.thread_busy(worker.id(), job));
    }

    pub(crate) fn notify_job_done(&self, job: &JobHandle) {
        self.emit(|sink| sink.job_done(job));
    }

    // --- internals (engine mutex held unless noted) ----------------------

    /// The dispatch algorithm.
    ///
    /// Settles `was_busy`, completes a pending suspension when the active
    /// count reaches zero, then scans the assignment list front-to-back
    /// for the first candidate whose policies all accept. With no eligible
    /// candidate the worker parks on `job_available` before returning.
    fn take_first_available_job(
        &self,
        worker: &Arc<Worker>,
        was_busy: bool,
        suspend_if_inactive: bool,
        just_returning: bool,
    ) -> Option<JobHandle> {
        let mut inner = self.inner.lock();
        debug_assert!(!was_busy || inner.active > 0);
        if was_busy {
            self.dec_active_locked(&mut inner);
        }

        if suspend_if_inactive && inner.active == 0 && self.state() == StateId::Suspending {
            self.set_state_locked(&mut inner, StateId::Suspended);
            return None;
        }

        if self.state() != StateId::WorkingHard || just_returning {
            return None;
        }

        let mut selected = None;
        for index in 0..inner.assignments.len() {
            if self.can_be_executed(&inner.assignments[index]) {
                selected = Some(index);
                break;
            }
        }
        match selected {
            Some(index) => {
                let job = inner.assignments.remove(index);
                inner.active += 1;
                trace!(
                    worker_id = worker.id(),
                    active = inner.active,
                    queue_length = inner.assignments.len(),
                    "job assigned"
                );
                Some(job)
            }
            None => {
                self.block_until_jobs_available(&mut inner, worker);
                None
            }
        }
    }

    /// Park `worker` until the queue is signalled, unless the state moved
    /// on while the worker was between dispatch and parking.
    fn wait_for_available_job(&self, worker: &Arc<Worker>) {
        let mut inner = self.inner.lock();
        if matches!(
            self.state(),
            StateId::WorkingHard | StateId::ShuttingDown | StateId::Destructed
        ) {
            return;
        }
        self.block_until_jobs_available(&mut inner, worker);
    }

    fn block_until_jobs_available(
        &self,
        inner: &mut MutexGuard<'_, EngineInner>,
        worker: &Arc<Worker>,
    ) {
        trace!(worker_id = worker.id(), state = self.state().name(), "worker parked");
        self.emit(|sink| sink.thread_suspended(worker.id()));
        self.job_available.wait(inner);
        trace!(worker_id = worker.id(), state = self.state().name(), "worker woke");
    }

    /// Try to acquire every policy of `candidate`, in order. On return the
    /// job either holds all of its reservations (true) or none (false).
    fn can_be_executed(&self, candidate: &JobHandle) -> bool {
        let policies = candidate.queue_policies();
        if policies.is_empty() {
            return true;
        }
        let mut acquired: Vec<Arc<dyn QueuePolicy>> = Vec::with_capacity(policies.len());
        for policy in &policies {
            if policy.can_run(candidate) {
                acquired.push(policy.clone());
            } else {
                for held in &acquired {
                    held.release(candidate);
                }
                trace!(policies = policies.len(), "queue policies rejected candidate");
                return false;
            }
        }
        true
    }

    fn dec_active_locked(&self, inner: &mut EngineInner) {
        debug_assert!(inner.active > 0);
        inner.active -= 1;
        trace!(
            active = inner.active,
            queue_length = inner.assignments.len(),
            "active count decreased"
        );
        // the finished job may have unblocked policy-gated peers, and
        // finish() callers re-check idleness on this signal
        self.job_finished.notify_all();
        if inner.is_idle() {
            self.emit(|sink| sink.finished());
        }
    }

    fn set_state_locked(&self, _inner: &mut EngineInner, id: StateId) {
        let previous = self.state.swap(id);
        if previous == id {
            return;
        }
        debug!(state = id.name(), "state changed");
        if id == StateId::Suspended {
            self.emit(|sink| sink.suspended());
        }
        self.emit(|sink| sink.state_changed(id));
        // parked workers re-evaluate on these transitions
        if matches!(id, StateId::WorkingHard | StateId::Suspending) {
            self.reschedule();
        }
    }

    fn enqueue_under_lock(self: &Arc<Self>, inner: &mut EngineInner, jobs: Vec<JobHandle>) {
        for job in jobs {
            assert_eq!(
                job.status(),
                JobStatus::New,
                "job is already queued or running"
            );
            self.adjust_inventory(inner, 1);
            {
                let mut ctx = QueueContext {
                    scheduler: self,
                    inner: &mut *inner,
                };
                job.about_to_be_queued(&mut ctx);
            }
            let priority = job.priority();
            let mut index = inner.assignments.len();
            while index > 0 && inner.assignments[index - 1].priority() < priority {
                index -= 1;
            }
            inner.assignments.insert(index, job.clone());
            job.set_status(JobStatus::Queued);
            trace!(
                priority,
                position = index,
                queue_length = inner.assignments.len(),
                "job queued"
            );
            self.reschedule();
        }
    }

    fn dequeue_under_lock(self: &Arc<Self>, inner: &mut EngineInner, job: &JobHandle) -> bool {
        if !inner
            .assignments
            .iter()
            .any(|queued| Arc::ptr_eq(queued, job))
        {
            trace!("dequeue: job not found in queue");
            return false;
        }
        {
            let mut ctx = QueueContext {
                scheduler: self,
                inner: &mut *inner,
            };
            job.about_to_be_dequeued(&mut ctx);
        }
        // the hook may have reshuffled the queue; locate the job again
        if let Some(position) = inner
            .assignments
            .iter()
            .position(|queued| Arc::ptr_eq(queued, job))
        {
            let removed = inner.assignments.remove(position);
            removed.set_status(JobStatus::New);
            debug!(queue_length = inner.assignments.len(), "job dequeued");
        }
        self.job_finished.notify_all();
        true
    }

    /// Grow the inventory by up to `new_jobs` workers, within the cap.
    /// Threads are created lazily here and nowhere else.
    fn adjust_inventory(self: &Arc<Self>, inner: &mut EngineInner, new_jobs: usize) {
        let reserve = inner.inventory_max.saturating_sub(inner.inventory.len());
        for _ in 0..reserve.min(new_jobs) {
            let id = self.created_threads.fetch_add(1, Ordering::AcqRel);
            let worker = Worker::new(id, Arc::downgrade(self));
            let thread_worker = worker.clone();
            let join = thread::Builder::new()
                .name(format!("{}-{id}", self.config.thread_name_prefix))
                .stack_size(self.config.thread_stack_size)
                .spawn(move || thread_worker.run_loop())
                .expect("failed to spawn worker thread");
            inner.inventory.push(WorkerHandle { worker, join });
            debug!(
                worker_id = id,
                inventory = inner.inventory.len(),
                "worker thread created"
            );
        }
    }

    fn emit(&self, event: impl Fn(&dyn EventSink)) {
        let observers = self.observers.lock();
        for sink in observers.iter() {
            event(sink.as_ref());
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.state() != StateId::Destructed {
            warn!("scheduler dropped without shutdown; worker threads are detached");
        }
    }
}

/// Locked view of the scheduler handed to job queue/dequeue hooks.
///
/// Proves the engine mutex is held and exposes the operations a hook may
/// perform without re-entering the public API (which would self-deadlock
/// on the non-recursive engine mutex).
pub struct QueueContext<'a> {
    scheduler: &'a Arc<Scheduler>,
    inner: &'a mut EngineInner,
}

impl QueueContext<'_> {
    /// The scheduler whose queue this job is entering or leaving.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.scheduler
    }

    /// Remove `job` from the queue if still waiting; same contract as
    /// [`Scheduler::dequeue`], minus the lock acquisition.
    pub fn dequeue(&mut self, job: &JobHandle) -> bool {
        let scheduler = self.scheduler;
        scheduler.dequeue_under_lock(&mut *self.inner, job)
    }

    /// Number of queued jobs.
    pub fn queue_length(&self) -> usize {
        self.inner.assignments.len()
    }
}
