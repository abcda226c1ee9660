//! Integration tests for the scheduler engine.
//!
//! Covers priority ordering, policy-gated dispatch, suspend/resume,
//! shutdown with pending work, observer events, and the silent no-op
//! behavior of terminal states.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use threadloom::{
    ClosureJob, EventSink, Job, JobError, JobHandle, QueuePolicy, Scheduler, SchedulerConfig,
    StateId,
};

// ============================================================================
// HELPERS
// ============================================================================

fn small_scheduler(max_threads: usize) -> Arc<Scheduler> {
    Scheduler::new(SchedulerConfig::new().with_max_threads(max_threads))
}

/// Poll `predicate` until it holds or `timeout` expires.
fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    predicate()
}

/// A job that appends its label to a shared log when it runs.
fn logging_job(label: &'static str, priority: i32, log: &Arc<Mutex<Vec<&'static str>>>) -> JobHandle {
    let log = Arc::clone(log);
    ClosureJob::with_priority(priority, move |_job, _thread| {
        log.lock().unwrap().push(label);
        Ok(())
    })
}

fn job_addr(job: &JobHandle) -> usize {
    Arc::as_ptr(job) as *const () as usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    StateChanged(StateId),
    Suspended,
    ThreadStarted(usize),
    ThreadBusy(usize, usize),
    ThreadExited(usize),
    JobDone(usize),
    Finished,
}

/// Sink recording every event in arrival order.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventSink for RecordingSink {
    fn state_changed(&self, state: StateId) {
        self.push(Event::StateChanged(state));
    }

    fn suspended(&self) {
        self.push(Event::Suspended);
    }

    fn thread_started(&self, thread_id: usize) {
        self.push(Event::ThreadStarted(thread_id));
    }

    fn thread_busy(&self, thread_id: usize, job: &JobHandle) {
        self.push(Event::ThreadBusy(thread_id, job_addr(job)));
    }

    fn thread_exited(&self, thread_id: usize) {
        self.push(Event::ThreadExited(thread_id));
    }

    fn job_done(&self, job: &JobHandle) {
        self.push(Event::JobDone(job_addr(job)));
    }

    fn finished(&self) {
        self.push(Event::Finished);
    }
}

/// Policy admitting at most `cap` holders at a time.
struct ResourceCapPolicy {
    cap: usize,
    used: AtomicUsize,
}

impl ResourceCapPolicy {
    fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            cap,
            used: AtomicUsize::new(0),
        })
    }
}

impl QueuePolicy for ResourceCapPolicy {
    fn can_run(&self, _job: &JobHandle) -> bool {
        if self.used.fetch_add(1, Ordering::SeqCst) < self.cap {
            true
        } else {
            self.used.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    fn release(&self, _job: &JobHandle) {
        self.used.fetch_sub(1, Ordering::SeqCst);
    }

    fn free(&self, _job: &JobHandle) {
        self.used.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// PRIORITY ORDERING
// ============================================================================

#[test]
fn test_priority_ordering_single_worker() {
    let scheduler = small_scheduler(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    let jobs = vec![
        logging_job("a", 1, &log),
        logging_job("b", 5, &log),
        logging_job("c", 3, &log),
        logging_job("d", 5, &log),
    ];
    scheduler.enqueue(jobs);
    scheduler.finish();
    scheduler.shutdown();

    assert_eq!(*log.lock().unwrap(), vec!["b", "d", "c", "a"]);
}

#[test]
fn test_fifo_within_equal_priority() {
    let scheduler = small_scheduler(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    // queue while suspended so dispatch starts only after the whole batch
    // is in place
    scheduler.suspend();
    assert_eq!(scheduler.state(), StateId::Suspended);
    scheduler.enqueue(vec![
        logging_job("a", 1, &log),
        logging_job("b", 3, &log),
        logging_job("c", 3, &log),
        logging_job("d", 2, &log),
        logging_job("e", 3, &log),
        logging_job("f", 1, &log),
    ]);
    assert_eq!(scheduler.queue_length(), 6);
    scheduler.resume();
    scheduler.finish();
    scheduler.shutdown();

    assert_eq!(*log.lock().unwrap(), vec!["b", "c", "e", "d", "a", "f"]);
}

// ============================================================================
// POLICY-GATED DISPATCH
// ============================================================================

#[test]
fn test_policy_caps_concurrency() {
    let scheduler = small_scheduler(2);
    let policy = ResourceCapPolicy::new(1);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut jobs: Vec<JobHandle> = Vec::new();
    for _ in 0..2 {
        let in_flight = Arc::clone(&in_flight);
        let max_in_flight = Arc::clone(&max_in_flight);
        let completed = Arc::clone(&completed);
        let job = ClosureJob::new(move |_job, _thread| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        job.core().assign_queue_policy(policy.clone());
        jobs.push(job);
    }

    scheduler.enqueue(jobs);
    scheduler.finish();
    scheduler.shutdown();

    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    // every reservation was returned
    assert_eq!(policy.used.load(Ordering::SeqCst), 0);
}

#[test]
fn test_policy_released_even_when_job_fails() {
    let scheduler = small_scheduler(1);
    let policy = ResourceCapPolicy::new(1);

    let failing = ClosureJob::new(|_job, _thread| Err(JobError::Failed("broken".into())));
    failing.core().assign_queue_policy(policy.clone());
    let handle: JobHandle = failing.clone();

    scheduler.enqueue(vec![handle]);
    scheduler.finish();
    scheduler.shutdown();

    assert_eq!(failing.status(), threadloom::JobStatus::Failed);
    assert_eq!(policy.used.load(Ordering::SeqCst), 0);
}

// ============================================================================
// SUSPEND / RESUME
// ============================================================================

#[test]
fn test_suspend_drains_then_resume_completes() {
    let scheduler = small_scheduler(2);
    let sink = Arc::new(RecordingSink::default());
    scheduler.register_observer(sink.clone());

    let started = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut jobs: Vec<JobHandle> = Vec::new();
    for _ in 0..4 {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        let completed = Arc::clone(&completed);
        jobs.push(ClosureJob::new(move |_job, _thread| {
            started.fetch_add(1, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    }
    scheduler.enqueue(jobs);

    // two workers, so exactly two jobs start
    assert!(wait_until(Duration::from_secs(5), || {
        started.load(Ordering::SeqCst) == 2
    }));
    scheduler.suspend();
    assert_eq!(scheduler.state(), StateId::Suspending);

    release.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(5), || {
        scheduler.state() == StateId::Suspended
    }));
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.queue_length(), 2);

    scheduler.resume();
    scheduler.finish();
    assert_eq!(completed.load(Ordering::SeqCst), 4);
    scheduler.shutdown();

    let suspended_events = sink
        .snapshot()
        .iter()
        .filter(|event| **event == Event::Suspended)
        .count();
    assert_eq!(suspended_events, 1);
}

#[test]
fn test_suspend_with_nothing_active_is_immediate() {
    let scheduler = small_scheduler(2);
    scheduler.suspend();
    assert_eq!(scheduler.state(), StateId::Suspended);
    scheduler.resume();
    assert_eq!(scheduler.state(), StateId::WorkingHard);
    scheduler.shutdown();
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_with_pending_work() {
    let scheduler = small_scheduler(4);
    let completed = Arc::new(AtomicUsize::new(0));

    let jobs: Vec<JobHandle> = (0..100)
        .map(|_| -> JobHandle {
            let completed = Arc::clone(&completed);
            ClosureJob::new(move |_job, _thread| {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();
    scheduler.enqueue(jobs);
    scheduler.shutdown();

    assert_eq!(completed.load(Ordering::SeqCst), 100);
    assert_eq!(scheduler.current_threads(), 0);
    assert_eq!(scheduler.queue_length(), 0);
    assert_eq!(scheduler.state(), StateId::Destructed);
}

#[test]
fn test_operations_after_shutdown_are_noops() {
    let scheduler = small_scheduler(2);
    scheduler.shutdown();
    assert_eq!(scheduler.state(), StateId::Destructed);

    let job = ClosureJob::new(|_job, _thread| Ok(()));
    let handle: JobHandle = job.clone();
    scheduler.enqueue(vec![handle.clone()]);
    assert_eq!(scheduler.queue_length(), 0);
    assert_eq!(job.status(), threadloom::JobStatus::New);

    assert!(!scheduler.dequeue(&handle));
    scheduler.dequeue_all();
    scheduler.suspend();
    scheduler.resume();
    scheduler.request_abort();
    scheduler.finish();
    assert_eq!(scheduler.state(), StateId::Destructed);

    // idempotent
    scheduler.shutdown();
    assert_eq!(scheduler.state(), StateId::Destructed);
}

#[test]
fn test_shutdown_from_other_thread_panics() {
    let scheduler = small_scheduler(1);
    let remote = scheduler.clone();
    let result = thread::spawn(move || remote.shutdown()).join();
    assert!(result.is_err(), "shutdown must be rejected off the owner thread");
    scheduler.shutdown();
}

// ============================================================================
// QUEUE MANAGEMENT
// ============================================================================

#[test]
fn test_dequeue_and_dequeue_all() {
    let scheduler = small_scheduler(1);
    scheduler.suspend();

    let log = Arc::new(Mutex::new(Vec::new()));
    let a = logging_job("a", 0, &log);
    let b = logging_job("b", 0, &log);
    let c = logging_job("c", 0, &log);
    scheduler.enqueue(vec![a.clone(), b.clone(), c.clone()]);
    assert_eq!(scheduler.queue_length(), 3);
    assert!(!scheduler.is_empty());

    assert!(scheduler.dequeue(&b));
    assert_eq!(scheduler.queue_length(), 2);
    assert_eq!(b.status(), threadloom::JobStatus::New);
    assert!(!scheduler.dequeue(&b), "a job can only be dequeued once");

    scheduler.dequeue_all();
    assert!(scheduler.is_empty());
    assert_eq!(a.status(), threadloom::JobStatus::New);

    scheduler.resume();
    scheduler.finish();
    scheduler.shutdown();
    assert!(log.lock().unwrap().is_empty(), "dequeued jobs must not run");
}

#[test]
fn test_dequeued_job_can_be_requeued() {
    let scheduler = small_scheduler(1);
    scheduler.suspend();

    let log = Arc::new(Mutex::new(Vec::new()));
    let job = logging_job("again", 0, &log);
    scheduler.enqueue(vec![job.clone()]);
    assert!(scheduler.dequeue(&job));

    scheduler.enqueue(vec![job.clone()]);
    scheduler.resume();
    scheduler.finish();
    scheduler.shutdown();
    assert_eq!(*log.lock().unwrap(), vec!["again"]);
}

// ============================================================================
// INVENTORY
// ============================================================================

#[test]
fn test_inventory_grows_lazily_up_to_cap() {
    let scheduler = small_scheduler(2);
    assert_eq!(scheduler.current_threads(), 0, "no eager thread creation");

    let release = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let jobs: Vec<JobHandle> = (0..8)
        .map(|_| -> JobHandle {
            let release = Arc::clone(&release);
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            ClosureJob::new(move |_job, _thread| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();
    scheduler.enqueue(jobs);
    assert_eq!(scheduler.current_threads(), 2, "growth stops at the cap");
    assert_eq!(scheduler.max_threads(), 2);

    release.store(true, Ordering::SeqCst);
    scheduler.finish();
    assert!(max_in_flight.load(Ordering::SeqCst) <= 2);

    // raising the cap allows growth on the next enqueue
    scheduler.set_max_threads(4);
    assert_eq!(scheduler.max_threads(), 4);
    let more: Vec<JobHandle> = (0..4)
        .map(|_| -> JobHandle { ClosureJob::new(|_job, _thread| Ok(())) })
        .collect();
    scheduler.enqueue(more);
    assert_eq!(scheduler.current_threads(), 4);
    scheduler.finish();
    scheduler.shutdown();
    assert_eq!(scheduler.current_threads(), 0);
}

#[test]
#[should_panic(expected = "larger than zero")]
fn test_zero_thread_cap_is_rejected() {
    let scheduler = small_scheduler(1);
    scheduler.set_max_threads(0);
}

#[test]
#[should_panic(expected = "already queued")]
fn test_double_enqueue_is_rejected() {
    let scheduler = small_scheduler(1);
    scheduler.suspend();
    let job: JobHandle = ClosureJob::new(|_job, _thread| Ok(()));
    scheduler.enqueue(vec![job.clone()]);
    scheduler.enqueue(vec![job]);
}

// ============================================================================
// ABORT AND FAILURE
// ============================================================================

#[test]
fn test_request_abort_is_cooperative() {
    let scheduler = small_scheduler(1);
    let started = Arc::new(AtomicBool::new(false));

    let started_in_job = Arc::clone(&started);
    let job = ClosureJob::new(move |self_job, _thread| {
        started_in_job.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self_job.core().abort_requested() {
            if Instant::now() > deadline {
                return Err(JobError::Failed("abort request never arrived".into()));
            }
            thread::sleep(Duration::from_millis(1));
        }
        Err(JobError::Aborted("stopping early".into()))
    });
    let handle: JobHandle = job.clone();
    scheduler.enqueue(vec![handle]);

    assert!(wait_until(Duration::from_secs(5), || {
        started.load(Ordering::SeqCst)
    }));
    scheduler.request_abort();
    scheduler.finish();
    scheduler.shutdown();

    assert_eq!(job.status(), threadloom::JobStatus::Aborted);
}

#[test]
fn test_failed_job_does_not_stop_the_queue() {
    let scheduler = small_scheduler(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    let failing = ClosureJob::with_priority(5, |_job, _thread| {
        Err(JobError::Failed("expected".into()))
    });
    let failing_handle: JobHandle = failing.clone();
    let after = logging_job("after", 0, &log);

    scheduler.enqueue(vec![failing_handle, after.clone()]);
    scheduler.finish();
    scheduler.shutdown();

    assert_eq!(failing.status(), threadloom::JobStatus::Failed);
    assert!(after.success());
    assert_eq!(*log.lock().unwrap(), vec!["after"]);
}

// ============================================================================
// OBSERVER EVENTS
// ============================================================================

#[test]
fn test_thread_busy_precedes_job_done() {
    let scheduler = small_scheduler(2);
    let sink = Arc::new(RecordingSink::default());
    scheduler.register_observer(sink.clone());

    let jobs: Vec<JobHandle> = (0..5)
        .map(|_| -> JobHandle { ClosureJob::new(|_job, _thread| Ok(())) })
        .collect();
    let addrs: Vec<usize> = jobs.iter().map(job_addr).collect();
    scheduler.enqueue(jobs);
    scheduler.finish();
    scheduler.shutdown();

    let events = sink.snapshot();
    for addr in addrs {
        let busy = events
            .iter()
            .position(|event| matches!(event, Event::ThreadBusy(_, a) if *a == addr));
        let done = events
            .iter()
            .position(|event| matches!(event, Event::JobDone(a) if *a == addr));
        let busy = busy.expect("every job reports thread_busy");
        let done = done.expect("every job reports job_done");
        assert!(busy < done, "thread_busy must precede job_done");
    }
}

#[test]
fn test_lifecycle_events_during_shutdown() {
    let scheduler = small_scheduler(2);
    let sink = Arc::new(RecordingSink::default());
    scheduler.register_observer(sink.clone());

    let jobs: Vec<JobHandle> = (0..4)
        .map(|_| -> JobHandle { ClosureJob::new(|_job, _thread| Ok(())) })
        .collect();
    scheduler.enqueue(jobs);
    scheduler.shutdown();

    let events = sink.snapshot();
    let started = events
        .iter()
        .filter(|event| matches!(event, Event::ThreadStarted(_)))
        .count();
    let exited = events
        .iter()
        .filter(|event| matches!(event, Event::ThreadExited(_)))
        .count();
    assert_eq!(started, 2);
    assert_eq!(exited, 2);

    let shutting_down = events
        .iter()
        .position(|event| *event == Event::StateChanged(StateId::ShuttingDown))
        .expect("shutting_down state observed");
    let destructed = events
        .iter()
        .position(|event| *event == Event::StateChanged(StateId::Destructed))
        .expect("destructed state observed");
    assert!(shutting_down < destructed);
    for (index, event) in events.iter().enumerate() {
        if matches!(event, Event::ThreadExited(_)) {
            assert!(index > shutting_down && index < destructed);
        }
    }
}

#[test]
fn test_finished_event_when_idle_reached() {
    let scheduler = small_scheduler(1);
    let sink = Arc::new(RecordingSink::default());
    scheduler.register_observer(sink.clone());

    let jobs: Vec<JobHandle> = (0..3)
        .map(|_| -> JobHandle { ClosureJob::new(|_job, _thread| Ok(())) })
        .collect();
    scheduler.enqueue(jobs);
    scheduler.finish();

    assert!(scheduler.is_idle());
    assert!(sink.snapshot().contains(&Event::Finished));
    scheduler.shutdown();
}
