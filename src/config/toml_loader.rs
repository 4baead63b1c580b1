//! TOML configuration file parsing.
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Deserialize the TOML file at `path` into `T`.
///
/// A missing file is treated as empty, so `T`'s `#[serde(default)]`s apply.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("config {} not found, using defaults", path.display());
            String::new()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read config file: {}", path.display()));
        }
    };
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
}
