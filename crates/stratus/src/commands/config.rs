//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::{Style, style};
use stratus_config::{LoggingConfig, SessionConfig, StratusConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./stratus.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local, force } => cmd_init(ctx, local, force),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let config = &loaded.config;
    let session = config.session_or_default();
    // Fail early on values the repository would reject.
    let repository = session.to_repository_config()?;

    if ctx.json_output {
        let resolved = StratusConfig {
            session: Some(session),
            logging: Some(config.logging_or_default()),
        };
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    let dim = Style::new().dim();

    println!();
    println!("{}", style("Stratus Configuration").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    println!("Session:");
    println!("  {} {}", dim.apply_to("cache:"), repository.cache_name);
    println!(
        "  {} {}s",
        dim.apply_to("max inactive:"),
        repository.max_inactive_interval.as_secs()
    );
    println!("  {} {}", dim.apply_to("locking:"), repository.use_locking);
    match &repository.remote_store_name {
        Some(remote) => println!(
            "  {} {} (pending {}ms x {})",
            dim.apply_to("remote store:"),
            remote,
            repository.remote_read_pending_interval.as_millis(),
            repository.remote_read_pending_retries
        ),
        None => println!("  {} none", dim.apply_to("remote store:")),
    }
    println!(
        "  {} {}ms",
        dim.apply_to("lock retry:"),
        repository.lock_retry_interval.as_millis()
    );
    println!();

    print_logging(&config.logging_or_default(), &dim);

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        println!("{}", config.to_toml()?);
    }

    Ok(())
}

fn print_logging(logging: &LoggingConfig, dim: &Style) {
    println!("Logging:");
    println!("  {} {}", dim.apply_to("level:"), logging.level);
    if logging.file.enabled {
        let path = logging
            .file
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<config dir>/logs".to_string());
        println!("  {} {}", dim.apply_to("file:"), path);
    } else {
        println!("  {} disabled", dim.apply_to("file:"));
    }
    println!();
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;

    println!("Config file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'stratus config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

fn cmd_init(ctx: &Context, local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("stratus.toml")
    } else {
        ctx.user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() && !force {
        bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    let defaults = StratusConfig {
        session: Some(SessionConfig::default()),
        logging: Some(LoggingConfig::default()),
    };
    stratus_config::save_config(&defaults, &path)?;

    println!("Created {}", path.display());
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    match ctx.user_config_path() {
        Some(path) => println!("{}", path.display()),
        None => println!("Could not determine config directory"),
    }
    Ok(())
}
