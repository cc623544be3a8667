//! Stratus - lock-coordinated session repository tooling
//!
//! Main entry point for the Stratus CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stratus_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

use commands::{config, drill};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Stratus - lock-coordinated session repository tooling
#[derive(Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// User config directory (default: ~/.config/stratus)
    #[arg(long, global = true, env = "STRATUS_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configuration management
    Config(config::ConfigArgs),

    /// Run concurrent read-modify-save rounds against an in-memory cluster
    Drill(drill::DrillArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = stratus_config::load_config_with_options(None, cli.config_dir.as_deref())?;
    let _guard = init_logging(
        &loaded.config.logging_or_default(),
        cli.config_dir.as_ref(),
        cli.verbose,
    );

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config_dir: cli.config_dir,
        loaded,
    };

    match cli.command {
        Commands::Config(args) => config::run(args, &ctx).await,
        Commands::Drill(args) => drill::run(args, &ctx).await,
    }
}

/// Initialize tracing: console (human-readable) plus a rotating JSON file.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(
    logging: &LoggingConfig,
    config_dir: Option<&PathBuf>,
    verbose: bool,
) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let console_filter = if verbose {
        EnvFilter::new("stratus=debug,stratus_session=debug,stratus_config=debug,info")
    } else {
        EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (file_layer, guard) = if logging.file.enabled {
        let log_dir = match &logging.file.path {
            Some(path) => path.clone(),
            None => config_dir
                .cloned()
                .or_else(stratus_config::xdg_config_dir)
                .map(|d| d.join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs")),
        };
        let file_appender = tracing_appender::rolling::daily(&log_dir, "stratus.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(
                "stratus=trace,stratus_session=trace,stratus_config=trace,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    guard
}
