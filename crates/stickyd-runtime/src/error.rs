//! Error types for the worker scheduler

use stickyd_core::ConfigError;
use thiserror::Error;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start()` called twice
    #[error("scheduler already started")]
    AlreadyStarted,

    /// Scheduler not started yet, or already shut down
    #[error("scheduler not running")]
    NotRunning,

    /// OS refused to create a carrier or timer thread
    #[error("failed to spawn {what} thread: {source}")]
    ThreadSpawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Fewer carriers came up than requested
    #[error("only {started} of {expected} carrier threads started")]
    CarriersUnavailable { expected: usize, started: usize },

    /// Probe tasks did not all run at the same time
    #[error("parallelism probe saw {observed} of {expected} carriers running concurrently")]
    ParallelismUnverified { expected: usize, observed: usize },

    /// Join deadline elapsed before the task finished
    #[error("timed out waiting for task")]
    JoinTimeout,

    /// Task was dropped before producing a value (panic or shutdown)
    #[error("task dropped before completion")]
    TaskLost,
}
