use thiserror::Error;

/// Failures raised by the job store and the cron evaluator.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cron expression could not be parsed or never fires.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The argument vector could not be encoded for storage.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("No job with id {id}")]
    JobNotFound { id: i64 },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
