//! Core scheduling abstractions: jobs, workers, dispatch, composition.

pub mod collection;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod policy;
pub mod scheduler;
pub mod state;
pub mod worker;

pub use collection::Collection;
pub use error::JobError;
pub use events::{EventSink, TraceSink};
pub use executor::{wrap_job, DefaultExecutor, ExecuteWrapper, Executor, WrapperLink};
pub use job::{
    default_execute, free_queue_policy_resources, ClosureJob, Job, JobCore, JobHandle, JobStatus,
};
pub use policy::QueuePolicy;
pub use scheduler::{QueueContext, Scheduler};
pub use state::StateId;
pub use worker::Worker;
