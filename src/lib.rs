//! # Threadloom
//!
//! A concurrent job scheduler: a bounded, lazily grown inventory of worker
//! threads executes jobs in priority order, gated by pluggable admission
//! policies, with composite jobs whose lifecycle spans a whole group of
//! children.
//!
//! The engine is a blocking, thread-parking design built on `parking_lot`:
//! one mutex guards the queue and the inventory, a `job_available` condvar
//! parks idle workers, and a `job_finished` condvar wakes `finish()`
//! callers. Workers are created on demand as jobs arrive, up to a
//! configurable cap, and joined at shutdown.
//!
//! ## Modules
//!
//! - [`core`](crate::core) - jobs, workers, the scheduler engine, composite
//!   collections
//! - [`config`](crate::config) - scheduler configuration
//! - [`util`](crate::util) - telemetry helpers
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use threadloom::{ClosureJob, JobHandle, Scheduler};
//!
//! let scheduler = Scheduler::with_defaults();
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&counter);
//! let job: JobHandle = ClosureJob::new(move |_job, _thread| {
//!     seen.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//!
//! scheduler.enqueue(vec![job]);
//! scheduler.finish();
//! scheduler.shutdown();
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Composite jobs
//!
//! A [`Collection`] groups jobs: queueing the collection queues nothing
//! else until the collection itself is dispatched; its elements then enter
//! the same scheduler and the group reports a single begin/end spanning
//! all of them. See the [`Collection`] docs for an example.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod util;

// Re-export the main types for convenience
pub use crate::config::SchedulerConfig;
pub use crate::core::{
    default_execute, free_queue_policy_resources, wrap_job, ClosureJob, Collection,
    DefaultExecutor, EventSink, ExecuteWrapper, Executor, Job, JobCore, JobError, JobHandle,
    JobStatus, QueueContext, QueuePolicy, Scheduler, StateId, TraceSink, Worker, WrapperLink,
};
pub use crate::util::init_tracing;
