//! `cronrun-dispatcher`: one pass over the job table.
//!
//! For every enabled job the [`Dispatcher`] decides due-ness, claims the job,
//! resolves its command, runs it through `cronrun-runner` with output going
//! to the job's own log, and writes the outcome back. Jobs are processed
//! strictly one after another; nothing one job does can abort another.

pub mod engine;
pub mod error;
pub mod joblog;
pub mod resolve;

pub use engine::{DispatchOptions, Dispatcher, JobOutcome, JobReport, PassReport};
pub use error::{DispatchError, Result};
pub use resolve::{CommandResolver, ConfiguredResolver, ResolvedCommand};
