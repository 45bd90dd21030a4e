use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, instrument, warn};

use crate::{
    db::{self, format_ts, row_to_job, JOB_COLUMNS},
    error::{Result, SchedulerError},
    schedule,
    types::{Claim, Job, NewJob},
};

/// The datastore operations the dispatcher relies on.
///
/// `claim` is the only mutual-exclusion mechanism between dispatchers; an
/// implementation must make its read-then-conditional-write atomic.
pub trait JobStore: Send + Sync {
    /// Snapshot of every enabled job, highest priority first.
    fn list_enabled(&self) -> Result<Vec<Job>>;

    /// Take ownership of `id`, stamping `last_execution` with the claim time.
    fn claim(&self, id: i64) -> Result<Claim>;

    /// Persist the outcome of a run and release the lock.
    fn record_result(&self, job: &Job, return_code: i32) -> Result<()>;

    /// Clear `locked` on every job locked for longer than `threshold_secs`.
    /// Returns the number of jobs released.
    fn unlock_stale(&self, threshold_secs: u64) -> Result<usize>;
}

/// [`JobStore`] backed by a SQLite file shared between dispatchers.
///
/// Wraps a single connection in a `Mutex`; other processes get their own
/// connection to the same file and SQLite serialises the writers.
pub struct SqliteJobStore {
    /// `None` for in-memory stores, which cannot be reopened.
    path: Option<PathBuf>,
    busy_timeout: Duration,
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (and if needed create) the store at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = db::open(&path, busy_timeout)?;
        Ok(Self {
            path: Some(path),
            busy_timeout,
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory store, mostly useful in tests.
    pub fn open_in_memory() -> Result<Self> {
        let busy_timeout = Duration::from_millis(0);
        let conn = Connection::open_in_memory()?;
        db::configure(&conn, busy_timeout)?;
        Ok(Self {
            path: None,
            busy_timeout,
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the connection with a fresh one opened from the same file.
    fn reopen(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(SchedulerError::Database(rusqlite::Error::InvalidPath(
                PathBuf::from(":memory:"),
            )));
        };
        let fresh = db::open(path, self.busy_timeout)?;
        *self.conn() = fresh;
        info!(path = %path.display(), "store connection reopened");
        Ok(())
    }

    // --- claim / result / reaper with an explicit clock ---------------------

    /// [`JobStore::claim`] with the claim time supplied by the caller.
    #[instrument(skip(self, now), fields(job_id = id))]
    pub fn claim_at(&self, id: i64, now: DateTime<Utc>) -> Result<Claim> {
        let now = now.trunc_subsecs(6);
        let mut conn = self.conn();
        // IMMEDIATE takes the write lock before the read, so two dispatchers
        // cannot both observe `locked = 0`.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let job = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?
            .ok_or(SchedulerError::JobNotFound { id })?;

        if job.locked {
            debug!("job already locked");
            return Ok(Claim::NotAvailable);
        }

        let changed = tx.execute(
            "UPDATE scheduled_jobs SET locked = 1, last_execution = ?1
             WHERE id = ?2 AND locked = 0",
            rusqlite::params![format_ts(now), id],
        )?;
        if changed == 0 {
            return Ok(Claim::NotAvailable);
        }
        tx.commit()?;

        Ok(Claim::Acquired(Job {
            locked: true,
            last_execution: Some(now),
            ..job
        }))
    }

    fn write_result(&self, id: i64, return_code: i32) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE scheduled_jobs
             SET last_return_code = ?1, locked = 0, execute_immediately = 0
             WHERE id = ?2",
            rusqlite::params![return_code, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        Ok(())
    }

    /// [`JobStore::unlock_stale`] measured against `now`.
    ///
    /// A locked job without a `last_execution` has no measurable age and is
    /// always considered stale.
    pub fn unlock_stale_at(&self, threshold_secs: u64, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = lock_cutoff(now, threshold_secs) else {
            debug!(threshold_secs, "threshold reaches before any representable time");
            return Ok(0);
        };
        let n = self.conn().execute(
            "UPDATE scheduled_jobs SET locked = 0
             WHERE locked = 1 AND (last_execution IS NULL OR last_execution < ?1)",
            [format_ts(cutoff)],
        )?;
        Ok(n)
    }

    // --- administration -----------------------------------------------------

    /// Insert a new job. The cron expression is validated first.
    pub fn add_job(&self, new: &NewJob) -> Result<Job> {
        schedule::parse(&new.cron_expression)?;
        let arguments = serde_json::to_string(&new.arguments)
            .map_err(|e| SchedulerError::InvalidArguments(e.to_string()))?;

        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO scheduled_jobs
                 (name, command_name, arguments, cron_expression, log_file,
                  priority, enabled, execute_immediately)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    new.name,
                    new.command_name,
                    arguments,
                    new.cron_expression,
                    new.log_file,
                    new.priority,
                    new.enabled,
                    new.execute_immediately,
                ],
            )?;
            conn.last_insert_rowid()
        };

        info!(job_id = id, name = %new.name, "job added");
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<Job> {
        self.conn()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?
            .ok_or(SchedulerError::JobNotFound { id })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Job>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE name = ?1"),
                [name],
                row_to_job,
            )
            .optional()?)
    }

    /// Every job, enabled or not, ordered by ID.
    pub fn list_all(&self) -> Result<Vec<Job>> {
        self.query_jobs(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY id"
        ))
    }

    /// Force-release one job regardless of how long it has been locked.
    pub fn unlock(&self, id: i64) -> Result<()> {
        let n = self
            .conn()
            .execute("UPDATE scheduled_jobs SET locked = 0 WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        info!(job_id = id, "job unlocked");
        Ok(())
    }

    /// Force-release every locked job.
    pub fn unlock_all(&self) -> Result<usize> {
        let n = self
            .conn()
            .execute("UPDATE scheduled_jobs SET locked = 0 WHERE locked = 1", [])?;
        Ok(n)
    }

    /// Ask for `id` to run on the next pass regardless of its schedule.
    pub fn request_immediate(&self, id: i64) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE scheduled_jobs SET execute_immediately = 1 WHERE id = ?1",
            [id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        Ok(())
    }

    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE scheduled_jobs SET enabled = ?1 WHERE id = ?2",
            rusqlite::params![enabled, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        Ok(())
    }

    /// Enabled jobs whose last run failed or that have been locked longer
    /// than `lock_threshold_secs`.
    pub fn failing_jobs(&self, lock_threshold_secs: u64) -> Result<Vec<Job>> {
        // NULL cutoff: no lock is old enough to count.
        let cutoff = lock_cutoff(Utc::now(), lock_threshold_secs).map(format_ts);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs
             WHERE enabled = 1
               AND ((last_return_code IS NOT NULL AND last_return_code != 0)
                    OR (locked = 1 AND ?1 IS NOT NULL
                        AND (last_execution IS NULL OR last_execution < ?1)))
             ORDER BY id"
        ))?;
        let rows = stmt.query_map([cutoff], row_to_job)?;
        Ok(collect_jobs(rows))
    }

    fn query_jobs(&self, sql: &str) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_job)?;
        Ok(collect_jobs(rows))
    }
}

/// The instant `threshold_secs` before `now`; locks taken earlier are stale.
///
/// `None` when the threshold reaches further back than chrono can represent,
/// in which case no lock is stale.
pub fn lock_cutoff(now: DateTime<Utc>, threshold_secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(threshold_secs).ok()?;
    now.checked_sub_signed(TimeDelta::try_seconds(secs)?)
}

/// Keep well-formed rows; a corrupt row must not hide the rest of the table.
fn collect_jobs<I>(rows: I) -> Vec<Job>
where
    I: Iterator<Item = rusqlite::Result<Job>>,
{
    rows.filter_map(|r| match r {
        Ok(job) => Some(job),
        Err(e) => {
            warn!("skipping unreadable job row: {e}");
            None
        }
    })
    .collect()
}

impl JobStore for SqliteJobStore {
    fn list_enabled(&self) -> Result<Vec<Job>> {
        self.query_jobs(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs
             WHERE enabled = 1
             ORDER BY priority DESC, id ASC"
        ))
    }

    fn claim(&self, id: i64) -> Result<Claim> {
        self.claim_at(id, Utc::now())
    }

    /// Retries once on a fresh connection if the first write fails at the
    /// database layer; the job otherwise stays locked until reaped.
    #[instrument(skip(self, job), fields(job_id = job.id))]
    fn record_result(&self, job: &Job, return_code: i32) -> Result<()> {
        match self.write_result(job.id, return_code) {
            Err(SchedulerError::Database(e)) if self.path.is_some() => {
                warn!("result write failed ({e}), retrying on a fresh connection");
                self.reopen()?;
                self.write_result(job.id, return_code)
            }
            other => other,
        }
    }

    fn unlock_stale(&self, threshold_secs: u64) -> Result<usize> {
        self.unlock_stale_at(threshold_secs, Utc::now())
    }
}
