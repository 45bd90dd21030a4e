//! Command-line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Locks older than this are reported by `monitor` unless overridden.
pub(crate) const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 3600;

/// Cron-like job dispatcher: run every due job once, safely alongside other
/// dispatchers sharing the same job store.
#[derive(Parser)]
#[command(name = "cronrun")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: $CRONRUN_CONFIG, then ~/.cronrun/cronrun.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run one dispatch pass over every enabled job
    Run {
        /// Report which jobs are due without claiming or running them
        #[arg(long)]
        dump: bool,

        /// Only log warnings and errors
        #[arg(long)]
        no_output: bool,

        /// Kill a job after this many seconds (overrides dispatcher.timeout_secs)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Release locks older than this many seconds before dispatching
        #[arg(long, value_name = "SECS")]
        unlock: Option<u64>,
    },

    /// Show every job with its lock state, last result and next run
    List,

    /// Release job locks by hand
    Unlock {
        /// Job name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,

        /// Release every locked job
        #[arg(long)]
        all: bool,

        /// Only release locks held longer than this many seconds
        #[arg(long, value_name = "SECS")]
        lock_timeout: Option<u64>,
    },

    /// Run a job on the next pass regardless of its schedule
    Trigger {
        /// Job name
        name: String,
    },

    /// List failing or stuck jobs; exits non-zero if there are any
    Monitor {
        /// Locks held longer than this many seconds count as stuck
        #[arg(long, value_name = "SECS", default_value_t = DEFAULT_LOCK_TIMEOUT_SECS)]
        lock_timeout: u64,
    },
}
