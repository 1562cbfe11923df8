use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::CtigateConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "ctigate.toml",
    "ctigate.yaml",
    "ctigate.yml",
    "ctigate.json",
];

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CTIGATE_CONFIG";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CtigateConfig> {
    let raw = read_substituted(path)?;
    parse_config(&raw, path)
}

/// Load a config file as an untyped JSON value, after env substitution.
pub fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = read_substituted(path)?;
    parse_config_value(&raw, path)
}

/// Discover and load config.
///
/// An explicit `path` must exist and parse. Otherwise the search order is
/// `$CTIGATE_CONFIG`, `./ctigate.{toml,yaml,yml,json}`, then the user config
/// directory; a discovered file that fails to parse is an error too.
/// Defaults are returned when nothing is found.
pub fn discover_and_load(path: Option<&Path>) -> anyhow::Result<CtigateConfig> {
    let found = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };
    match found {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path)
        },
        None => {
            debug!("no config file found, using defaults");
            Ok(CtigateConfig::default())
        },
    }
}

/// Find the first config file in the standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV)
        && !explicit.is_empty()
    {
        let p = PathBuf::from(explicit);
        if p.exists() {
            return Some(p);
        }
        warn!(path = %p.display(), "{CONFIG_ENV} points at a missing file");
    }

    if let Some(p) = first_existing(Path::new(".")) {
        return Some(p);
    }

    config_dir().and_then(|dir| first_existing(&dir))
}

/// Returns the user-global config directory (`~/.config/ctigate/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "ctigate").map(|d| d.config_dir().to_path_buf())
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn read_substituted(path: &Path) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    Ok(substitute_env(&raw))
}

fn format_of(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CtigateConfig> {
    match format_of(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    match format_of(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
