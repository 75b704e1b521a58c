//! Configuration loading, validation, and env substitution.
//!
//! Config files: `medbot.toml`, `medbot.yaml`, or `medbot.json`
//! Searched in `./` then the user config dir (`~/.config/medbot/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        DatabaseConfig, DiscordConfig, FetchConfig, MedbotConfig, NotificationsConfig,
        SchedulerConfig,
    },
};
