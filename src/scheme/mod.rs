//! Color schemes: the data model, color parsing, validation and per-target
//! color mapping.

pub mod color;
pub mod mapping;
pub mod validation;

pub use color::{ColorFormat, Hsl, Rgba, parse_color, validate_color};
pub use mapping::map_colors;
pub use validation::validate_scheme;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ValidationError;

/// Mapping from color key to color string.
///
/// A `BTreeMap` so iteration (and therefore hashing for cache keys) is
/// deterministic.
pub type ColorMap = BTreeMap<String, String>;

/// Keys every scheme must define in [`ColorScheme::colors`].
pub const REQUIRED_COLORS: [&str; 18] = [
    "colour0",
    "colour1",
    "colour2",
    "colour3",
    "colour4",
    "colour5",
    "colour6",
    "colour7",
    "colour8",
    "colour9",
    "colour10",
    "colour11",
    "colour12",
    "colour13",
    "colour14",
    "colour15",
    "background",
    "foreground",
];

/// Light or dark scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    /// Dark background, light text.
    Dark,
    /// Light background, dark text.
    Light,
}

impl Mode {
    /// Lowercase name used in cache keys and serialized schemes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            _ => Err(ValidationError::InvalidMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

/// A named color scheme.
///
/// The engine only ever reads a scheme; it is passed around as
/// `&ColorScheme`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScheme {
    /// Human-readable scheme name.
    pub name: String,
    /// Light or dark.
    pub mode: Mode,
    /// Palette colors (`colour0`..`colour15`, `background`, `foreground`, ...).
    pub colors: ColorMap,
    /// Extra named colors (`cursor`, `accent`, ...).
    #[serde(default)]
    pub special: ColorMap,
}

impl ColorScheme {
    /// Create a scheme with no colors.
    #[must_use]
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            colors: ColorMap::new(),
            special: ColorMap::new(),
        }
    }

    /// Builder-style setter for a palette color.
    #[must_use]
    pub fn with_color(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.colors.insert(key.into(), value.into());
        self
    }

    /// Builder-style setter for a special color.
    #[must_use]
    pub fn with_special(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.special.insert(key.into(), value.into());
        self
    }

    /// Parse a scheme from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the mode is invalid.
    /// Colors are not validated here; see [`validate_scheme`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parsing color scheme JSON")
    }

    /// Load a scheme from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading color scheme {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in {}", path.display()))
    }

    /// Look up a key in `colors`, then `special`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.colors
            .get(key)
            .or_else(|| self.special.get(key))
            .map(String::as_str)
    }
}
