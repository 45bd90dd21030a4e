use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, Row};

use crate::error::Result;
use crate::types::Job;

/// Column list shared by every `SELECT` that feeds [`row_to_job`].
pub(crate) const JOB_COLUMNS: &str = "id, name, command_name, arguments, cron_expression,
     last_execution, locked, execute_immediately, last_return_code,
     log_file, priority, enabled";

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `scheduled_jobs` table (idempotent) and an index matching the
/// dispatcher's listing query.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id                  INTEGER NOT NULL PRIMARY KEY,
            name                TEXT    NOT NULL UNIQUE,
            command_name        TEXT    NOT NULL,
            arguments           TEXT    NOT NULL DEFAULT '[]', -- JSON array of strings
            cron_expression     TEXT    NOT NULL,
            last_execution      TEXT,                          -- RFC 3339 UTC or NULL
            locked              INTEGER NOT NULL DEFAULT 0,
            execute_immediately INTEGER NOT NULL DEFAULT 0,
            last_return_code    INTEGER,
            log_file            TEXT,
            priority            INTEGER NOT NULL DEFAULT 0,
            enabled             INTEGER NOT NULL DEFAULT 1
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_enabled
            ON scheduled_jobs (enabled, priority DESC, id);
        ",
    )?;
    Ok(())
}

/// Open `path`, switch it to WAL, set the busy timeout and run `init_db`.
///
/// The busy timeout makes a concurrent claim wait for the other writer's
/// IMMEDIATE transaction instead of failing with `SQLITE_BUSY`.
pub fn open(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, busy_timeout)?;
    Ok(conn)
}

pub(crate) fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    init_db(conn)
}

/// Timestamps are stored with a fixed width and a `Z` suffix so that SQL
/// string comparison orders them chronologically.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Map a SQLite row selected with [`JOB_COLUMNS`] to a `Job`.
pub(crate) fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let args_json: String = row.get(3)?;
    let arguments: Vec<String> = serde_json::from_str(&args_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let last_execution = row
        .get::<_, Option<String>>(5)?
        .map(|raw| parse_ts(5, &raw))
        .transpose()?;

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        command_name: row.get(2)?,
        arguments,
        cron_expression: row.get(4)?,
        last_execution,
        locked: row.get(6)?,
        execute_immediately: row.get(7)?,
        last_return_code: row.get(8)?,
        log_file: row.get(9)?,
        priority: row.get(10)?,
        enabled: row.get(11)?,
    })
}
