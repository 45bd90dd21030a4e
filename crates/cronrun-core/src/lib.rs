//! `cronrun-core`: configuration, shared identifiers and the top-level error
//! type used by every other `cronrun` crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::CronrunConfig;
pub use error::{CoreError, Result};
pub use types::RunId;
