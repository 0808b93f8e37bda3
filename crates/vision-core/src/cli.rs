//! Shared CLI helpers for workspace tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Workspace crates whose events the tools show by default
const LOG_TARGETS: [&str; 4] = ["vision_core", "vision_data", "vision_training", "train"];

/// Filter used when `RUST_LOG` is unset: workspace crates at `info` (or
/// `debug` when verbose), dependencies at `warn`.
pub fn default_log_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let mut directives = String::from("warn");
    for target in LOG_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `verbose`.
pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_log_directives(verbose)))
        .map_err(|e| Error::Config(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbose))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))
}

/// Reads a TOML training config. Missing files and malformed TOML are both
/// `Error::Config` naming the file.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    if !path.is_file() {
        return Err(Error::Config(format!("no config file at {}", path.display())));
    }
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;

    toml::from_str(&content).map_err(|e| Error::Config(format!("{} is not a valid config: {e}", path.display())))
}

/// Writes `value` as pretty TOML, creating parent directories.
pub fn save_toml_config<T>(value: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml::to_string_pretty(value)?)?;
    Ok(())
}
