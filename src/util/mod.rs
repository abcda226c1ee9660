//! Small shared utilities.

pub(crate) mod semaphore;
pub mod telemetry;

pub use telemetry::init_tracing;
