//! Application handlers: the per-target rendering plug-ins.
//!
//! A handler turns a mapped [`ColorMap`] into staged operations through the
//! [`TargetContext`] it is given; it never writes to disk directly. Handlers
//! are registered in a [`HandlerRegistry`], eagerly or behind a factory that
//! runs on first use.

mod registry;
mod template;

pub use registry::{DEFAULT_SLOW_INIT_THRESHOLD, HandlerFactory, HandlerRegistry, RegistryError};
pub use template::TemplateHandler;

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

use crate::engine::TargetContext;
use crate::scheme::{ColorFormat, ColorMap};

/// A target application that can be themed.
pub trait ApplicationHandler: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Render `colors` and stage the resulting operations on `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    fn apply(&self, colors: &ColorMap, ctx: &mut TargetContext<'_>) -> Result<()>;

    /// Check that `colors` satisfies this handler.
    ///
    /// The default requires every key in [`required_colors`](Self::required_colors).
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing key.
    fn validate(&self, colors: &ColorMap) -> Result<()> {
        for key in self.required_colors() {
            if !colors.contains_key(&key) {
                bail!("{} requires color '{key}'", self.name());
            }
        }
        Ok(())
    }

    /// Whether the application is present on this system. Targets that are
    /// not installed are skipped.
    fn is_installed(&self) -> bool {
        true
    }

    /// Color keys this handler reads.
    fn required_colors(&self) -> Vec<String> {
        Vec::new()
    }

    /// Primary file this handler writes; backed up before applying.
    fn output_path(&self) -> PathBuf;

    /// Format the engine converts colors to before calling [`apply`](Self::apply).
    fn color_format(&self) -> ColorFormat {
        ColorFormat::Hex
    }

    /// Inputs other than the colors that shape the rendered output, such as
    /// template text. They are hashed into the render cache key.
    fn render_fingerprint(&self, _template_dir: Option<&Path>) -> Option<Vec<u8>> {
        None
    }
}

impl std::fmt::Debug for dyn ApplicationHandler + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationHandler")
            .field("name", &self.name())
            .field("output_path", &self.output_path())
            .finish()
    }
}
