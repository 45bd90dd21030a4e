//! Subcommand handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use cronrun_core::CronrunConfig;
use cronrun_dispatcher::{ConfiguredResolver, DispatchOptions, Dispatcher, JobOutcome, PassReport};
use cronrun_scheduler::{lock_cutoff, reaper, schedule, Job, SqliteJobStore};
use tracing::info;

pub(crate) struct RunArgs {
    pub dump: bool,
    pub no_output: bool,
    pub timeout: Option<u64>,
    pub unlock: Option<u64>,
}

/// One dispatch pass. Per-job failures are reported, never returned.
pub(crate) async fn run(
    config: &CronrunConfig,
    store: Arc<SqliteJobStore>,
    args: RunArgs,
) -> Result<()> {
    let mut options = DispatchOptions::from_config(&config.dispatcher);
    options.dump = args.dump;
    options.unlock_threshold_secs = args.unlock;
    if let Some(secs) = args.timeout {
        options.timeout = Duration::from_secs(secs);
    }

    let resolver = Arc::new(ConfiguredResolver::new(config.commands.clone()));
    let dispatcher = Dispatcher::new(store, resolver, options);
    let report = dispatcher.run_pass().await?;

    if !args.no_output {
        print!("{}", render_report(&report, args.dump));
    }
    Ok(())
}

pub(crate) fn list(store: &SqliteJobStore) -> Result<()> {
    let jobs = store.list_all()?;
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }
    let now = Utc::now();
    println!(
        "{:>4}  {:<24} {:<16} {:>4}  {:<7} {:<6} {:>5}  NEXT RUN",
        "ID", "NAME", "SCHEDULE", "PRIO", "STATE", "LOCKED", "LAST"
    );
    for job in &jobs {
        println!(
            "{:>4}  {:<24} {:<16} {:>4}  {:<7} {:<6} {:>5}  {}",
            job.id,
            job.name,
            job.cron_expression,
            job.priority,
            if job.enabled { "enabled" } else { "off" },
            if job.locked { "yes" } else { "no" },
            job.last_return_code
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
            next_run_label(job, now),
        );
    }
    Ok(())
}

pub(crate) fn unlock(
    store: &SqliteJobStore,
    name: Option<&str>,
    lock_timeout: Option<u64>,
) -> Result<()> {
    let Some(name) = name else {
        let released = match lock_timeout {
            Some(secs) => reaper::reap_stale_locks(store, secs)?,
            None => store.unlock_all()?,
        };
        println!("released {released} lock(s)");
        return Ok(());
    };

    let job = find_job(store, name)?;
    if !job.locked {
        println!("{name} is not locked");
        return Ok(());
    }
    if let Some(secs) = lock_timeout {
        if !held_longer_than(&job, secs, Utc::now()) {
            println!("{name} has been locked for less than {secs}s, left alone");
            return Ok(());
        }
    }
    store.unlock(job.id)?;
    println!("{name} unlocked");
    Ok(())
}

pub(crate) fn trigger(store: &SqliteJobStore, name: &str) -> Result<()> {
    let job = find_job(store, name)?;
    store.request_immediate(job.id)?;
    info!(job_id = job.id, name, "immediate run requested");
    println!("{name} will run on the next pass");
    Ok(())
}

/// Print failing jobs. Returns `true` if there were any.
pub(crate) fn monitor(store: &SqliteJobStore, lock_timeout: u64) -> Result<bool> {
    let failing = store.failing_jobs(lock_timeout)?;
    if failing.is_empty() {
        println!("all jobs healthy");
        return Ok(false);
    }
    for job in &failing {
        println!("{}", failure_line(job, lock_timeout, Utc::now()));
    }
    Ok(true)
}

fn find_job(store: &SqliteJobStore, name: &str) -> Result<Job> {
    store
        .find_by_name(name)
        .with_context(|| format!("looking up job {name}"))?
        .ok_or_else(|| anyhow!("no job named {name}"))
}

fn held_longer_than(job: &Job, secs: u64, now: DateTime<Utc>) -> bool {
    let Some(cutoff) = lock_cutoff(now, secs) else {
        return false;
    };
    job.last_execution.map_or(true, |at| at < cutoff)
}

fn next_run_label(job: &Job, now: DateTime<Utc>) -> String {
    if !job.enabled {
        return "-".to_string();
    }
    if job.execute_immediately {
        return "next pass".to_string();
    }
    let after = job.last_execution.unwrap_or(now);
    match schedule::next_run(&job.cron_expression, after) {
        Ok(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        Err(_) => "invalid schedule".to_string(),
    }
}

fn failure_line(job: &Job, lock_timeout: u64, now: DateTime<Utc>) -> String {
    if job.locked && held_longer_than(job, lock_timeout, now) {
        format!("{} (#{}): locked for more than {lock_timeout}s", job.name, job.id)
    } else {
        format!(
            "{} (#{}): last run exited with {}",
            job.name,
            job.id,
            job.last_return_code.unwrap_or_default()
        )
    }
}

fn describe(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::NotDue => "not due".to_string(),
        JobOutcome::InvalidSchedule(e) => format!("invalid schedule: {e}"),
        JobOutcome::Due => "due".to_string(),
        JobOutcome::Locked => "locked, skipped".to_string(),
        JobOutcome::ClaimFailed(e) => format!("claim failed: {e}"),
        JobOutcome::Completed { return_code } => format!("exited with {return_code}"),
        JobOutcome::Failed {
            return_code,
            reason,
        } => format!("failed ({return_code}): {reason}"),
    }
}

/// Dump mode lists every job; a normal pass lists only the jobs it touched.
fn render_report(report: &PassReport, dump: bool) -> String {
    let mut out = String::new();
    if report.unlocked > 0 {
        out.push_str(&format!("released {} stale lock(s)\n", report.unlocked));
    }
    for job in &report.jobs {
        let invalid = matches!(job.outcome, JobOutcome::InvalidSchedule(_));
        if dump || invalid || job.outcome.was_due() {
            out.push_str(&format!(
                "{} (#{}): {}\n",
                job.name,
                job.job_id,
                describe(&job.outcome)
            ));
        }
    }
    if report.nothing_to_do() {
        out.push_str("nothing to do\n");
    }
    out
}
