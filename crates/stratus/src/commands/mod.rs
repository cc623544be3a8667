//! CLI command handlers.

use std::path::PathBuf;

use stratus_config::LoadedConfig;

pub mod config;
pub mod drill;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// User config directory override.
    pub config_dir: Option<PathBuf>,
    /// Configuration discovered at startup.
    pub loaded: LoadedConfig,
}

impl Context {
    /// Path of the user config file, honouring `--config-dir`.
    pub fn user_config_path(&self) -> Option<PathBuf> {
        match &self.config_dir {
            Some(dir) => Some(dir.join("config.toml")),
            None => stratus_config::xdg_config_path(),
        }
    }
}
