//! Observer sinks receiving scheduler events.

use tracing::debug;

use crate::core::job::{Job, JobHandle};
use crate::core::state::StateId;

/// Receives scheduler lifecycle events.
///
/// Sinks are invoked while the scheduler holds internal locks: they must
/// return quickly and must not call back into the scheduler synchronously.
/// Hand the event off (channel, buffer, log line) and return.
///
/// Every method has a no-op default, so a sink implements only the events
/// it cares about.
pub trait EventSink: Send + Sync {
    /// The engine entered a new lifecycle state.
    fn state_changed(&self, _state: StateId) {}

    /// The engine reached `Suspended`; fired in addition to
    /// [`state_changed`](Self::state_changed).
    fn suspended(&self) {}

    /// A worker thread entered its run loop.
    fn thread_started(&self, _thread_id: usize) {}

    /// A worker is about to execute `job`.
    fn thread_busy(&self, _thread_id: usize, _job: &JobHandle) {}

    /// A worker parked waiting for work.
    fn thread_suspended(&self, _thread_id: usize) {}

    /// A worker thread exited during shutdown.
    fn thread_exited(&self, _thread_id: usize) {}

    /// A job finished executing (in any terminal status).
    fn job_done(&self, _job: &JobHandle) {}

    /// The queue became empty with no job running.
    fn finished(&self) {}
}

/// Sink forwarding every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceSink;

impl EventSink for TraceSink {
    fn state_changed(&self, state: StateId) {
        debug!(state = state.name(), "scheduler state changed");
    }

    fn suspended(&self) {
        debug!("scheduler suspended");
    }

    fn thread_started(&self, thread_id: usize) {
        debug!(thread_id, "thread started");
    }

    fn thread_busy(&self, thread_id: usize, job: &JobHandle) {
        debug!(thread_id, priority = job.priority(), "thread busy");
    }

    fn thread_suspended(&self, thread_id: usize) {
        debug!(thread_id, "thread suspended");
    }

    fn thread_exited(&self, thread_id: usize) {
        debug!(thread_id, "thread exited");
    }

    fn job_done(&self, job: &JobHandle) {
        debug!(status = ?job.status(), "job done");
    }

    fn finished(&self) {
        debug!("all jobs finished");
    }
}
