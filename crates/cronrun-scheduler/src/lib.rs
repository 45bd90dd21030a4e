//! `cronrun-scheduler`: persisted job definitions, cron evaluation and the
//! locking protocol that lets several dispatchers share one store.
//!
//! # Overview
//!
//! Jobs live in a SQLite `scheduled_jobs` table. A dispatcher lists enabled
//! jobs, asks [`schedule::is_due`] whether each should run, and takes
//! ownership through [`JobStore::claim`], an atomic conditional update on the
//! `locked` column. After the external process finishes the outcome is
//! written back with [`JobStore::record_result`], which always releases the
//! lock and clears `execute_immediately`.
//!
//! | Operation       | Effect                                              |
//! |-----------------|-----------------------------------------------------|
//! | `list_enabled`  | snapshot of every enabled job                       |
//! | `claim`         | `locked: false -> true`, stamps `last_execution`    |
//! | `record_result` | stores the return code, unlocks, clears the override|
//! | `unlock_stale`  | force-unlocks jobs locked longer than a threshold   |

pub mod db;
pub mod error;
pub mod reaper;
pub mod schedule;
pub mod store;
pub mod types;

pub use error::{Result, SchedulerError};
pub use store::{lock_cutoff, JobStore, SqliteJobStore};
pub use types::{Claim, Job, NewJob, INTERNAL_FAILURE_CODE};
