use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Environment variable carrying the run correlation id into the child.
pub const DEFAULT_RUN_ID_VAR: &str = "CRONRUN_RUN_ID";

/// Top-level config (cronrun.toml + CRONRUN_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronrunConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Command aliases keyed by the `command_name` stored on a job.
    #[serde(default)]
    pub commands: BTreeMap<String, CommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a writer waits on another dispatcher's lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory job `log_file` paths are resolved against.
    /// `None` disables job output logging entirely.
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    #[serde(default = "default_run_id_var")]
    pub run_id_var: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            log_dir: None,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            run_id_var: default_run_id_var(),
        }
    }
}

/// Maps a job's `command_name` to a concrete program and leading arguments,
/// e.g. an interpreter plus the script it should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}
fn default_run_id_var() -> String {
    DEFAULT_RUN_ID_VAR.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronrun/cronrun.db", home)
}

impl CronrunConfig {
    /// Load config from a TOML file with CRONRUN_* env var overrides.
    ///
    /// Nested keys use a double underscore: `CRONRUN_DISPATCHER__TIMEOUT_SECS`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRONRUN_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronrun/cronrun.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let cfg = CronrunConfig::load(Some("does-not-exist.toml")).expect("load");
            assert_eq!(cfg.dispatcher.timeout_secs, DEFAULT_TIMEOUT_SECS);
            assert_eq!(cfg.dispatcher.run_id_var, "CRONRUN_RUN_ID");
            assert!(cfg.dispatcher.log_dir.is_none());
            assert!(cfg.commands.is_empty());
            Ok(())
        });
    }

    #[test]
    fn file_and_env_are_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cronrun.toml",
                r#"
                [database]
                path = "/tmp/jobs.db"

                [dispatcher]
                timeout_secs = 60
                log_dir = "/var/log/cronrun"

                [commands.report]
                program = "/usr/bin/php"
                args = ["bin/console", "app:report"]
                "#,
            )?;
            jail.set_env("CRONRUN_DISPATCHER__TIMEOUT_SECS", "90");

            let cfg = CronrunConfig::load(Some("cronrun.toml")).expect("load");
            assert_eq!(cfg.database.path, "/tmp/jobs.db");
            assert_eq!(cfg.dispatcher.timeout_secs, 90);
            assert_eq!(cfg.dispatcher.log_dir.as_deref(), Some("/var/log/cronrun"));
            let report = &cfg.commands["report"];
            assert_eq!(report.program, "/usr/bin/php");
            assert_eq!(report.args, vec!["bin/console", "app:report"]);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file("cronrun.toml", "[dispatcher]\ntimeout_secs = \"soon\"\n")?;
            let err = CronrunConfig::load(Some("cronrun.toml")).unwrap_err();
            assert!(matches!(err, crate::error::CoreError::Config(_)));
            Ok(())
        });
    }
}
