use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a whole pass. Per-job failures never surface here;
/// they are recorded on the job and reported in the pass report.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Log directory {path} is not writable: {reason}")]
    LogDirUnwritable { path: PathBuf, reason: String },

    #[error(transparent)]
    Store(#[from] cronrun_scheduler::SchedulerError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
