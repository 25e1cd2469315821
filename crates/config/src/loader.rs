use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::AlderConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["alder.toml", "alder.yaml", "alder.yml", "alder.json"];

static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);
static DATA_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<AlderConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./alder.{toml,yaml,yml,json}` (project-local)
/// 2. `<config_dir>/alder.{toml,yaml,yml,json}` (user-global)
///
/// Returns `AlderConfig::default()` if no config file is found or it fails to parse.
pub fn discover_and_load() -> AlderConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    AlderConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/alder/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = read_override(&CONFIG_DIR_OVERRIDE) {
        return Some(dir);
    }
    directories::ProjectDirs::from("", "", "alder").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory holding skills, tickets and persisted state.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = read_override(&DATA_DIR_OVERRIDE) {
        return dir;
    }
    directories::ProjectDirs::from("", "", "alder")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".alder"))
}

pub fn set_config_dir(dir: PathBuf) {
    write_override(&CONFIG_DIR_OVERRIDE, Some(dir));
}

pub fn set_data_dir(dir: PathBuf) {
    write_override(&DATA_DIR_OVERRIDE, Some(dir));
}

pub fn clear_data_dir() {
    write_override(&DATA_DIR_OVERRIDE, None);
}

fn read_override(slot: &RwLock<Option<PathBuf>>) -> Option<PathBuf> {
    slot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn write_override(slot: &RwLock<Option<PathBuf>>, value: Option<PathBuf>) {
    *slot.write().unwrap_or_else(|e| e.into_inner()) = value;
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<AlderConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
