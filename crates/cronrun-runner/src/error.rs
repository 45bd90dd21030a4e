//! Error types for the cronrun-runner crate.

use thiserror::Error;

/// Ways a run can fail to produce an ordinary exit code.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The child outlived its deadline and was killed.
    #[error("Process timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The child exited with a code at or above the abnormal threshold
    /// (signal death or "command not found" by shell convention).
    #[error("Process terminated abnormally with code {code}")]
    AbnormalExit { code: i32, output: String },

    /// Spawn, pipe or wait failure inside the runner itself.
    #[error("Runner failure: {0}")]
    Internal(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RunnerError>;
