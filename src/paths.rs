//! Configuration file location
//!
//! # Environment Variables
//!
//! - `VERDICT_CONFIG` - Path of the configuration file
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `VERDICT_CONFIG` environment variable
//! 2. `XDG_CONFIG_HOME/verdict/config.toml` (if set)
//! 3. `~/.config/verdict/config.toml`

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable for the config file override
pub const ENV_CONFIG: &str = "VERDICT_CONFIG";

const APP_DIR: &str = "verdict";
const CONFIG_FILE: &str = "config.toml";

/// Get the verdict config file path
pub fn config_file() -> Result<PathBuf> {
    resolve_config_file(
        std::env::var_os(ENV_CONFIG),
        std::env::var_os("XDG_CONFIG_HOME"),
        dirs::home_dir(),
    )
}

/// Resolution behind [`config_file`], with the environment passed in.
fn resolve_config_file(
    override_path: Option<OsString>,
    xdg_config: Option<OsString>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    // 1. Explicit override
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        let path = expand_tilde(Path::new(&path), home.as_deref());
        log::debug!("Using config file from {ENV_CONFIG}: {}", path.display());
        return Ok(path);
    }

    // 2. XDG_CONFIG_HOME
    if let Some(xdg) = xdg_config.filter(|p| !p.is_empty()) {
        let path = PathBuf::from(xdg).join(APP_DIR).join(CONFIG_FILE);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    // 3. ~/.config/verdict/config.toml
    let home = home.context("Could not determine home directory")?;
    let path = home.join(".config").join(APP_DIR).join(CONFIG_FILE);
    log::debug!("Using default config file: {}", path.display());
    Ok(path)
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

// ============================================================================
// Tests
// ============================================================================
