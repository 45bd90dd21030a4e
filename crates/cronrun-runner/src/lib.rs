//! cronrun-runner: runs one external command for the dispatcher.
//!
//! The child is spawned with an explicit argument vector and environment,
//! its stdout and stderr are drained concurrently line by line into an
//! [`OutputSink`], and a deadline bounds the whole run. Every failure mode
//! comes back as a [`RunnerError`]; raw I/O errors never leak past [`run`].
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cronrun_runner::{run, DiscardSink, Invocation, RunOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let invocation = Invocation::new("/bin/echo").arg("hello");
//!     let options = RunOptions::with_timeout(Duration::from_secs(5));
//!     let result = run(&invocation, &options, &mut DiscardSink).await.unwrap();
//!     assert_eq!(result.exit_code, 0);
//! }
//! ```

pub mod buffer;
pub mod error;
pub mod lines;
pub mod runner;
pub mod sink;
pub mod types;

pub use error::{Result, RunnerError};
pub use runner::run;
pub use sink::{DiscardSink, OutputSink};
pub use types::{ExecResult, Invocation, OutputLine, RunOptions, Stream, ABNORMAL_EXIT_THRESHOLD};
