use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cronrun_core::{config::DispatcherConfig, RunId};
use cronrun_runner::{self as runner, DiscardSink, Invocation, RunOptions, RunnerError};
use cronrun_scheduler::{reaper, schedule, Claim, Job, JobStore, INTERNAL_FAILURE_CODE};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    error::Result,
    joblog::{self, JobLog, Level},
    resolve::CommandResolver,
};

/// Injected next to the run id so a job can tell which row started it.
pub const JOB_ID_VAR: &str = "CRONRUN_JOB_ID";

/// Knobs for a single pass.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Report due-ness only; never claim or execute.
    pub dump: bool,
    pub timeout: Duration,
    /// Run the stale-lock reaper with this threshold before dispatching.
    pub unlock_threshold_secs: Option<u64>,
    /// `None` disables job output logging; output is discarded.
    pub log_dir: Option<PathBuf>,
    pub max_output_chars: usize,
    pub run_id_var: String,
}

impl DispatchOptions {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            dump: false,
            timeout: Duration::from_secs(config.timeout_secs),
            unlock_threshold_secs: None,
            log_dir: config.log_dir.as_ref().map(PathBuf::from),
            max_output_chars: config.max_output_chars,
            run_id_var: config.run_id_var.clone(),
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}

/// What happened to one job during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    NotDue,
    /// The cron expression could not be evaluated; the job was left alone.
    InvalidSchedule(String),
    /// Due, but dump mode was on.
    Due,
    /// Another dispatcher holds the lock.
    Locked,
    /// The store refused the claim for a reason other than contention.
    ClaimFailed(String),
    /// The process ran and exited on its own with an ordinary code.
    Completed { return_code: i32 },
    /// Unresolvable command, timeout, abnormal exit or runner failure.
    Failed { return_code: i32, reason: String },
}

impl JobOutcome {
    pub fn was_due(&self) -> bool {
        !matches!(self, JobOutcome::NotDue | JobOutcome::InvalidSchedule(_))
    }

    pub fn was_executed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. } | JobOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: i64,
    pub name: String,
    pub outcome: JobOutcome,
}

/// Summary of one pass, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Locks released by the reaper before dispatching.
    pub unlocked: usize,
    pub jobs: Vec<JobReport>,
}

impl PassReport {
    pub fn nothing_to_do(&self) -> bool {
        !self.jobs.iter().any(|j| j.outcome.was_due())
    }

    pub fn executed(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.was_executed()).count()
    }

    pub fn outcome(&self, job_id: i64) -> Option<&JobOutcome> {
        self.jobs
            .iter()
            .find(|j| j.job_id == job_id)
            .map(|j| &j.outcome)
    }
}

/// Drives one pass over the job table.
///
/// Holds no datastore lock while a process runs; ownership is expressed only
/// through the job's `locked` flag.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    resolver: Arc<dyn CommandResolver>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: Arc<dyn CommandResolver>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            resolver,
            options,
        }
    }

    /// Process every enabled job once, strictly in sequence.
    ///
    /// # Errors
    ///
    /// Only pass-level failures: an unwritable log directory (checked before
    /// anything else) or a store error while reaping or listing. Failures of
    /// individual jobs are reported in the returned [`PassReport`].
    pub async fn run_pass(&self) -> Result<PassReport> {
        if !self.options.dump {
            if let Some(dir) = &self.options.log_dir {
                joblog::ensure_writable(dir)?;
            }
        }

        let mut report = PassReport::default();
        if let Some(threshold) = self.options.unlock_threshold_secs {
            report.unlocked = reaper::reap_stale_locks(self.store.as_ref(), threshold)?;
        }

        let jobs = self.store.list_enabled()?;
        debug!(count = jobs.len(), "enabled jobs");

        for job in jobs {
            let job_id = job.id;
            let name = job.name.clone();
            let outcome = self.dispatch(job).await;
            report.jobs.push(JobReport {
                job_id,
                name,
                outcome,
            });
        }

        if report.nothing_to_do() {
            info!("nothing to do");
        }
        Ok(report)
    }

    async fn dispatch(&self, job: Job) -> JobOutcome {
        let due = match schedule::is_due(&job, Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                error!(job_id = job.id, name = %job.name, "cannot evaluate schedule: {e}");
                return JobOutcome::InvalidSchedule(e.to_string());
            }
        };
        if !due {
            debug!(job_id = job.id, name = %job.name, "not due");
            return JobOutcome::NotDue;
        }
        if self.options.dump {
            info!(job_id = job.id, name = %job.name, "due (dump mode, not executed)");
            return JobOutcome::Due;
        }

        let job = match self.store.claim(job.id) {
            Ok(Claim::Acquired(job)) => job,
            Ok(Claim::NotAvailable) => {
                info!(job_id = job.id, name = %job.name, "locked, skipped");
                return JobOutcome::Locked;
            }
            Err(e) => {
                error!(job_id = job.id, name = %job.name, "claim failed: {e}");
                return JobOutcome::ClaimFailed(e.to_string());
            }
        };

        // Everything below belongs to this run only and is dropped with it.
        let run_id = RunId::new();
        let span = info_span!("job", job_id = job.id, run_id = %run_id, name = %job.name);
        self.execute(job, run_id).instrument(span).await
    }

    /// Run a claimed job and release it. Every path ends in `release`.
    async fn execute(&self, job: Job, run_id: RunId) -> JobOutcome {
        let Some(resolved) = self.resolver.resolve(&job.command_name) else {
            error!(command = %job.command_name, "command not found");
            self.release(&job, INTERNAL_FAILURE_CODE);
            return JobOutcome::Failed {
                return_code: INTERNAL_FAILURE_CODE,
                reason: format!("command '{}' not found", job.command_name),
            };
        };

        let invocation = Invocation::new(resolved.program)
            .args(resolved.leading_args)
            .args(job.arguments.iter().cloned())
            .with_run_id(&self.options.run_id_var, &run_id)
            .env(JOB_ID_VAR, job.id.to_string());
        let command_line = invocation.display_line();
        info!(command = %command_line, "executing");

        let options = RunOptions {
            timeout: self.options.timeout,
            max_output_chars: self.options.max_output_chars,
        };
        let mut job_log = self.open_job_log(&job, &run_id);
        if let Some(log) = job_log.as_mut() {
            log.record(Level::Info, &format!("started: {command_line}"));
        }

        let result = match job_log.as_mut() {
            Some(log) => runner::run(&invocation, &options, log).await,
            None => runner::run(&invocation, &options, &mut DiscardSink).await,
        };

        let (return_code, outcome, summary) = match result {
            Ok(done) => {
                if done.exit_code == 0 {
                    info!(exit_code = done.exit_code, "finished");
                } else {
                    warn!(exit_code = done.exit_code, "finished with non-zero exit code");
                }
                (
                    done.exit_code,
                    JobOutcome::Completed {
                        return_code: done.exit_code,
                    },
                    (Level::Info, format!("finished with exit code {}", done.exit_code)),
                )
            }
            Err(err) => {
                let code = match &err {
                    RunnerError::Timeout { secs } => {
                        error!(timeout_secs = secs, "timed out, process killed");
                        INTERNAL_FAILURE_CODE
                    }
                    RunnerError::AbnormalExit { code, .. } => {
                        error!(severity = "critical", exit_code = code, "abnormal termination");
                        *code
                    }
                    RunnerError::Internal(msg) => {
                        error!(severity = "critical", "runner failure: {msg}");
                        INTERNAL_FAILURE_CODE
                    }
                };
                let reason = err.to_string();
                (
                    code,
                    JobOutcome::Failed {
                        return_code: code,
                        reason: reason.clone(),
                    },
                    (Level::Error, reason),
                )
            }
        };

        if let Some(mut log) = job_log {
            log.record(summary.0, &summary.1);
            log.finish();
        }
        self.release(&job, return_code);
        outcome
    }

    fn open_job_log(&self, job: &Job, run_id: &RunId) -> Option<JobLog> {
        let dir = self.options.log_dir.as_deref()?;
        let file = job.log_file.as_deref()?;
        match JobLog::open(dir, file, job.id, run_id.clone()) {
            Ok(log) => Some(log),
            Err(e) => {
                error!(log_file = %file, "cannot open job log, output discarded: {e}");
                None
            }
        }
    }

    /// Persist the outcome and drop the lock. A failure here is logged, not
    /// propagated: the job stays locked until the reaper clears it.
    fn release(&self, job: &Job, return_code: i32) {
        if let Err(e) = self.store.record_result(job, return_code) {
            error!(
                severity = "critical",
                job_id = job.id,
                return_code,
                "failed to record result, job remains locked: {e}"
            );
        }
    }
}
