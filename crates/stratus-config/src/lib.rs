//! Configuration system for the Stratus session repository.
//!
//! Provides TOML-based configuration with:
//! - Repository settings (`[session]`) converted into a
//!   [`stratus_session::RepositoryConfig`]
//! - Log output settings (`[logging]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
