use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;

#[derive(Debug, Error)]
pub enum SqlMapperError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter binding error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Row deserialization error: {0}")]
    DeserializeError(String),

    /// The caller's cancellation token was triggered before or during the call.
    #[error("Operation cancelled")]
    Cancelled,

    /// The unit of work could not be handed to the worker pool.
    #[error("Scheduling error: {0}")]
    SchedulingError(String),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlMapperError {
    /// True when this outcome represents cancellation rather than a fault.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio::task::JoinError> for SqlMapperError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            SqlMapperError::WorkerPanicked(err.to_string())
        } else {
            // the runtime dropped the task before it could run
            SqlMapperError::SchedulingError(err.to_string())
        }
    }
}
