use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cronrun_core::CronrunConfig;
use cronrun_scheduler::SqliteJobStore;
use tracing::info;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let quiet = matches!(cli.command, Commands::Run { no_output: true, .. });
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if quiet {
                    "warn".into()
                } else {
                    "cronrun=info".into()
                }
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    // config: --config > CRONRUN_CONFIG env > ~/.cronrun/cronrun.toml
    let config_path = cli
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("CRONRUN_CONFIG").ok());
    let config = CronrunConfig::load(config_path.as_deref()).context("loading configuration")?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening job store");
    let store = SqliteJobStore::open(
        db_path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )
    .with_context(|| format!("opening job store at {db_path}"))?;

    match cli.command {
        Commands::Run {
            dump,
            no_output,
            timeout,
            unlock,
        } => {
            let args = commands::RunArgs {
                dump,
                no_output,
                timeout,
                unlock,
            };
            commands::run(&config, Arc::new(store), args).await?;
        }
        Commands::List => commands::list(&store)?,
        Commands::Unlock {
            name,
            all: _,
            lock_timeout,
        } => commands::unlock(&store, name.as_deref(), lock_timeout)?,
        Commands::Trigger { name } => commands::trigger(&store, &name)?,
        Commands::Monitor { lock_timeout } => {
            if commands::monitor(&store, lock_timeout)? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
