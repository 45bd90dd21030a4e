//! Per-job output log.
//!
//! Each job with a `log_file` gets its own append-only file of JSON lines:
//!
//! ```text
//! {"ts":"2026-05-01T10:16:00.123456Z","level":"INFO","message":"backup done","job_id":7,"run_id":"…","stream":"stdout"}
//! ```
//!
//! Every record carries the job id and the run's correlation id so that
//! interleaved runs in one file can be told apart.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use cronrun_core::RunId;
use cronrun_runner::{OutputSink, Stream};
use serde::Serialize;
use tracing::warn;

use crate::error::{DispatchError, Result};

const CHECK_FILE: &str = ".cronrun-write-check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Serialize)]
struct Record<'a> {
    ts: String,
    level: Level,
    message: &'a str,
    job_id: i64,
    run_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<&'static str>,
}

/// Make sure `dir` exists and accepts new files. Checked once per pass,
/// before any job is claimed.
pub fn ensure_writable(dir: &Path) -> Result<()> {
    let unwritable = |e: std::io::Error| DispatchError::LogDirUnwritable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };
    fs::create_dir_all(dir).map_err(unwritable)?;
    let check = dir.join(CHECK_FILE);
    File::create(&check).map_err(unwritable)?;
    fs::remove_file(&check).map_err(unwritable)?;
    Ok(())
}

/// Append-only JSON-lines log for one run of one job.
pub struct JobLog {
    path: PathBuf,
    file: BufWriter<File>,
    job_id: i64,
    run_id: RunId,
    write_failed: bool,
}

impl JobLog {
    /// Open `log_file` (relative to `log_dir` unless absolute) for appending.
    pub fn open(
        log_dir: &Path,
        log_file: &str,
        job_id: i64,
        run_id: RunId,
    ) -> std::io::Result<Self> {
        let path = log_dir.join(log_file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            job_id,
            run_id,
            write_failed: false,
        })
    }

    pub fn record(&mut self, level: Level, message: &str) {
        self.write(level, message, None);
    }

    fn write(&mut self, level: Level, message: &str, stream: Option<&'static str>) {
        let record = Record {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level,
            message,
            job_id: self.job_id,
            run_id: self.run_id.as_str(),
            stream,
        };
        // Newline appended before writing so each record goes out in one call.
        let result = serde_json::to_string(&record)
            .map_err(std::io::Error::other)
            .and_then(|mut line| {
                line.push('\n');
                self.file.write_all(line.as_bytes())
            });
        self.note_failure(result);
    }

    /// Flush buffered records to disk. Called once the run has finished.
    pub fn finish(mut self) {
        let result = self.file.flush();
        self.note_failure(result);
    }

    /// Warn once; a broken log must not fail the run.
    fn note_failure(&mut self, result: std::io::Result<()>) {
        if let Err(e) = result {
            if !self.write_failed {
                warn!(path = %self.path.display(), "job log write failed: {e}");
                self.write_failed = true;
            }
        }
    }
}

impl OutputSink for JobLog {
    fn line(&mut self, stream: Stream, text: &str) {
        let (level, tag) = match stream {
            Stream::Stdout => (Level::Info, "stdout"),
            Stream::Stderr => (Level::Warn, "stderr"),
        };
        self.write(level, text, Some(tag));
    }
}
