//! User configuration (`config.toml`).
//!
//! ```toml
//! output_buffer_size = "4MB"   # or a byte count
//! format = "json"              # terminal | json | quiet
//! color = false
//! default_tags = ["smoke"]
//! ```

use crate::engine::output::DEFAULT_CAPACITY;
use crate::paths;
use crate::render::Format;
use crate::ui;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Capture capacity per output stream, in bytes
    #[serde(deserialize_with = "deserialize_size")]
    pub output_buffer_size: usize,
    pub format: Format,
    pub color: bool,
    /// Tags selected when none are given on the command line
    pub default_tags: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_buffer_size: DEFAULT_CAPACITY,
            format: Format::Terminal,
            color: true,
            default_tags: Vec::new(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let path = paths::config_file()?;
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.output_buffer_size == 0 {
            anyhow::bail!("output_buffer_size must be greater than zero");
        }
        Ok(config)
    }
}

/// Accept either a byte count or a size string such as `"2MB"`.
fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Text(String),
    }

    let bytes = match Size::deserialize(deserializer)? {
        Size::Bytes(bytes) => bytes,
        Size::Text(text) => ui::parse_size(&text).map_err(serde::de::Error::custom)?,
    };
    usize::try_from(bytes).map_err(serde::de::Error::custom)
}
