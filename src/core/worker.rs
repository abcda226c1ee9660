//! Worker threads executing jobs from the scheduler.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::core::job::{Job, JobHandle};
use crate::core::scheduler::Scheduler;

/// A worker owned by a scheduler's thread inventory.
///
/// The back-reference to the scheduler is weak: it is used only to apply
/// for work, and the loop ends gracefully once the scheduler is gone. A
/// worker never sleeps outside the scheduler's parking mechanism: all
/// blocking happens on the `job_available` condvar under the engine mutex.
pub struct Worker {
    id: usize,
    scheduler: Weak<Scheduler>,
    current_job: Mutex<Option<JobHandle>>,
}

impl Worker {
    pub(crate) fn new(id: usize, scheduler: Weak<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            id,
            scheduler,
            current_job: Mutex::new(None),
        })
    }

    /// Inventory-unique worker id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Forward a cooperative abort request to the running job, if any.
    pub(crate) fn request_abort(&self) {
        let job = self.current_job.lock().clone();
        if let Some(job) = job {
            job.request_abort();
        }
    }

    /// Thread main loop: apply for work, execute, repeat. Exits when the
    /// scheduler stops handing out jobs (shutdown) or has been dropped.
    pub(crate) fn run_loop(self: &Arc<Self>) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        scheduler.thread_entered_run(self);
        debug!(worker_id = self.id, "worker entered run loop");

        let mut job: Option<JobHandle> = None;
        loop {
            let was_busy = job.is_some();
            job = scheduler.apply_for_work(self, was_busy);
            match &job {
                Some(next) => {
                    scheduler.notify_thread_busy(self, next);
                    *self.current_job.lock() = Some(next.clone());
                    next.execute(next, self);
                    *self.current_job.lock() = None;
                    scheduler.notify_job_done(next);
                }
                None => break,
            }
        }
        debug!(worker_id = self.id, "worker exiting");
    }
}
