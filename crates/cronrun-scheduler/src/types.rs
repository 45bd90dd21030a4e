use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Return code recorded when a run could not produce a real exit status
/// (unresolvable command, timeout, runner failure).
pub const INTERNAL_FAILURE_CODE: i32 = -1;

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Row ID, primary key.
    pub id: i64,
    /// Unique human-readable label.
    pub name: String,
    /// Program to invoke; resolved through command aliases or `PATH`.
    pub command_name: String,
    /// Arguments appended after the resolved command.
    pub arguments: Vec<String>,
    /// Five, six or seven-field cron expression.
    pub cron_expression: String,
    /// When the most recent run was attempted (claim time), if ever.
    pub last_execution: Option<DateTime<Utc>>,
    /// True while a dispatcher owns the job.
    pub locked: bool,
    /// One-shot override: run on the next pass regardless of schedule.
    pub execute_immediately: bool,
    /// Exit status of the last completed attempt.
    pub last_return_code: Option<i32>,
    /// Output log path, relative to the configured log directory.
    pub log_file: Option<String>,
    /// Higher values are dispatched first within a pass.
    pub priority: i32,
    pub enabled: bool,
}

/// Fields supplied when inserting a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub command_name: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub cron_expression: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub execute_immediately: bool,
}

impl NewJob {
    /// An enabled job with no arguments, no log file and default priority.
    pub fn new(name: &str, command_name: &str, cron_expression: &str) -> Self {
        Self {
            name: name.to_string(),
            command_name: command_name.to_string(),
            arguments: Vec::new(),
            cron_expression: cron_expression.to_string(),
            log_file: None,
            priority: 0,
            enabled: true,
            execute_immediately: false,
        }
    }

    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }
}

fn bool_true() -> bool {
    true
}

/// Outcome of [`crate::JobStore::claim`].
///
/// Losing a claim to another dispatcher is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the job; the record reflects the new lock state.
    Acquired(Job),
    /// Another worker holds the lock.
    NotAvailable,
}
