//! Cadence - broker-free work queue
//!
//! Entry point for the `cadence` CLI: worker process, project administration
//! and client commands against a shared store.

mod app;
mod cli;
mod cmd_items;
mod cmd_project;
mod cmd_worker;

use std::process::ExitCode;

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cadence_config::{Config, ConfigLoader, ConfigValidator, LogConfig};

use crate::app::App;
use crate::cli::{Cli, Commands};

/// Initialize tracing with console output and, if `log.dir` is set, a
/// daily-rolling file.
fn init_tracing(log: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match &log.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("cadence")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Dropping the guard stops the writer thread.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

fn validate(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let report = ConfigValidator::validate(config);
    for warning in &report.warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    if !report.is_valid() {
        let problems: Vec<String> = report
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        return Err(format!("invalid configuration: {}", problems.join("; ")).into());
    }
    Ok(())
}

async fn run(command: Commands, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    validate(&config)?;

    match command {
        Commands::Worker {
            worker_id,
            kinds,
            max_concurrency,
        } => cmd_worker::run_worker(config, worker_id, kinds, max_concurrency).await,
        Commands::Project { action } => {
            cmd_project::handle_project_command(&App::open(&config).await?, action).await
        }
        Commands::Enqueue { action } => cmd_items::handle_enqueue(&App::open(&config).await?, action).await,
        Commands::List {
            kind,
            scope,
            cursor,
            limit,
        } => cmd_items::list(&App::open(&config).await?, kind, scope, cursor, limit).await,
        Commands::Show { kind, id, scope } => cmd_items::show(&App::open(&config).await?, kind, id, scope).await,
        Commands::Toggle { id, disabled, scope } => {
            cmd_items::toggle(&App::open(&config).await?, id, disabled, scope).await
        }
        Commands::Delete { kind, id, scope } => {
            cmd_items::delete(&App::open(&config).await?, kind, id, scope).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is configured from the file, so load errors only reach stderr.
    let config = match ConfigLoader::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_tracing(&config.log) {
        eprintln!("Error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
