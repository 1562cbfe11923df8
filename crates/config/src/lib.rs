//! Configuration loading, env substitution, and validation.
//!
//! Config files: `ctigate.toml`, `ctigate.yaml`, `ctigate.yml` or
//! `ctigate.json`. Searched at `$CTIGATE_CONFIG`, then `./`, then the user
//! config directory.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{AccountConfig, AuthConfig, CtigateConfig, DatabaseConfig, ServerConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
