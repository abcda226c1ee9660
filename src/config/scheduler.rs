//! Scheduler configuration structures.

use serde::{Deserialize, Serialize};

/// Default inventory cap: twice the hardware concurrency, at least 4.
fn default_max_threads() -> usize {
    (2 * num_cpus::get()).max(4)
}

/// Default thread stack size: 2MB.
fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024 // 2MB
}

/// Default worker thread name prefix.
fn default_thread_name_prefix() -> String {
    "loom-worker".to_string()
}

/// Configuration for a [`Scheduler`](crate::core::Scheduler).
///
/// # Example
///
/// ```rust
/// use threadloom::SchedulerConfig;
///
/// let config = SchedulerConfig::new()
///     .with_max_threads(4)
///     .with_thread_stack_size(512 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on the worker-thread inventory. Workers are created
    /// lazily as jobs arrive and never shrunk before shutdown.
    ///
    /// Default: `max(4, 2 × num_cpus::get())`.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Stack size per worker thread in bytes.
    ///
    /// Default: 2MB (2 * 1024 * 1024 bytes).
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,

    /// Worker thread name prefix; the inventory index is appended.
    ///
    /// Default: `loom-worker`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            thread_stack_size: default_thread_stack_size(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// A configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inventory cap.
    #[must_use]
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the per-thread stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_threads == 0 {
            return Err("max_threads must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64KB".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let config: SchedulerConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        config.validate()?;
        Ok(config)
    }
}
