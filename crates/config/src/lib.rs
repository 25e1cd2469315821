//! Configuration loading and env substitution.
//!
//! Config files: `alder.toml`, `alder.yaml`, or `alder.json`
//! Searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_data_dir, config_dir, data_dir, discover_and_load, load_config, set_config_dir,
        set_data_dir,
    },
    schema::{AlderConfig, GithubConfig, HostConfig, SkillsConfig},
};
