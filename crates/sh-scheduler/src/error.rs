//! Error types for the scheduler

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors raised while registering or managing scheduler entries
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed `minute hour day weekday` expression
    #[error("invalid crontab '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// Malformed sunrise/sunset expression
    #[error("invalid sun expression '{expr}': {reason}")]
    InvalidSun { expr: String, reason: String },

    #[error("invalid cycle '{value}'")]
    InvalidCycle { value: String },

    #[error("no scheduler entry named '{name}'")]
    UnknownEntry { name: String },

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one executed task
///
/// Task errors are logged by the worker that ran the task and never
/// propagate further.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Wrap any error as a task failure
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        TaskError::Other(Box::new(err))
    }
}
