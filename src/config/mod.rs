//! Engine configuration loaded from `config.toml`.
//!
//! ```toml
//! template_dir = "~/.config/theme-engine/templates"
//!
//! [engine]
//! worker_pool = 8
//! transactional = true
//!
//! [cache]
//! persist = true
//!
//! [backup]
//! retention = 10
//!
//! [[targets]]
//! name = "kitty"
//! template = "kitty.conf"
//! output = "~/.config/kitty/colors.conf"
//! format = "hex"
//! requires = "kitty"
//! reload = ["kitty", "@", "load-config"]
//! ```
//!
//! Every section and field is optional; a missing file yields the defaults.

pub mod toml_loader;
pub mod validation;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{
    CacheOptions, DEFAULT_CONVERSION_ENTRIES, DEFAULT_MAX_SIZE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL,
};
use crate::engine::{DEFAULT_SLOW_THRESHOLD, DEFAULT_WORKER_POOL};
use crate::handlers::{
    ApplicationHandler, DEFAULT_SLOW_INIT_THRESHOLD, HandlerRegistry, RegistryError,
    TemplateHandler,
};
use crate::scheme::ColorFormat;
use crate::transaction::DEFAULT_RETENTION;
use validation::{ConfigValidator as _, TargetValidator, ValidationWarning};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory `[[targets]]` templates are resolved against.
    pub template_dir: Option<PathBuf>,
    /// `[engine]` section.
    pub engine: EngineSection,
    /// `[cache]` section.
    pub cache: CacheSection,
    /// `[backup]` section.
    pub backup: BackupSection,
    /// `[[targets]]` entries.
    pub targets: Vec<TargetConfig>,
}

/// Dispatch and transaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// Maximum targets applied concurrently.
    pub worker_pool: usize,
    /// Commit all targets as one transaction.
    pub transactional: bool,
    /// Warn when a target takes longer than this many milliseconds.
    pub slow_apply_ms: u64,
    /// Warn when a lazy handler takes longer than this many milliseconds to build.
    pub slow_init_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            worker_pool: DEFAULT_WORKER_POOL,
            transactional: true,
            slow_apply_ms: duration_ms(DEFAULT_SLOW_THRESHOLD),
            slow_init_ms: duration_ms(DEFAULT_SLOW_INIT_THRESHOLD),
        }
    }
}

/// Render cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Cache rendered output at all.
    pub enabled: bool,
    /// Byte budget.
    pub max_size_bytes: usize,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Background sweep period in seconds; `0` disables the sweeper.
    pub sweep_interval_secs: u64,
    /// Keep entries on disk across runs.
    pub persist: bool,
    /// Persistence directory (default `$XDG_CACHE_HOME/theme-engine/renders`).
    pub dir: Option<PathBuf>,
    /// Capacity of the color conversion cache.
    pub conversion_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: DEFAULT_MAX_SIZE,
            ttl_secs: DEFAULT_TTL.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            persist: false,
            dir: None,
            conversion_entries: DEFAULT_CONVERSION_ENTRIES,
        }
    }
}

/// Backup settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupSection {
    /// Snapshot output files before applying.
    pub enabled: bool,
    /// Backup root (default `$XDG_CACHE_HOME/theme-engine/backups`).
    pub dir: Option<PathBuf>,
    /// Number of backups kept.
    pub retention: usize,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// One templated target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Target name; also the mapping alias table used.
    pub name: String,
    /// Template path relative to the template directory.
    pub template: PathBuf,
    /// Output file; `~` expands to the home directory.
    pub output: PathBuf,
    /// Color format placeholders are rendered in.
    #[serde(default)]
    pub format: ColorFormat,
    /// Program that must be on `PATH` for the target to apply.
    #[serde(default)]
    pub requires: Option<String>,
    /// Command (program and arguments) run after the file is written.
    #[serde(default)]
    pub reload: Vec<String>,
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl EngineConfig {
    /// `$XDG_CONFIG_HOME/theme-engine/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        crate::logging::config_dir().join("config.toml")
    }

    /// Load the configuration at `path`; a missing file yields the defaults.
    ///
    /// A relative `template_dir` is resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = toml_loader::load_config(path)
            .with_context(|| format!("loading engine config {}", path.display()))?;
        if let Some(dir) = config.template_dir.take() {
            let dir = expand_home(&dir);
            config.template_dir = Some(match path.parent() {
                Some(base) if dir.is_relative() => base.join(dir),
                _ => dir,
            });
        }
        Ok(config)
    }

    /// Directory templates are read from.
    #[must_use]
    pub fn template_dir(&self) -> PathBuf {
        self.template_dir
            .as_deref()
            .map_or_else(|| crate::logging::config_dir().join("templates"), expand_home)
    }

    /// Backup root directory.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .dir
            .as_deref()
            .map_or_else(|| crate::logging::cache_dir().join("backups"), expand_home)
    }

    /// Render cache options derived from `[cache]`.
    #[must_use]
    pub fn cache_options(&self) -> CacheOptions {
        let options = CacheOptions::default()
            .with_max_size(self.cache.max_size_bytes)
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
            .with_sweep_interval(Duration::from_secs(self.cache.sweep_interval_secs));
        if self.cache.persist {
            let dir = self
                .cache
                .dir
                .as_deref()
                .map_or_else(|| crate::logging::cache_dir().join("renders"), expand_home);
            options.with_persist_dir(dir)
        } else {
            options
        }
    }

    /// Slow-apply warning threshold.
    #[must_use]
    pub const fn slow_apply_threshold(&self) -> Duration {
        Duration::from_millis(self.engine.slow_apply_ms)
    }

    /// Slow handler-construction warning threshold.
    #[must_use]
    pub const fn slow_init_threshold(&self) -> Duration {
        Duration::from_millis(self.engine.slow_init_ms)
    }

    /// Check `[[targets]]` for likely mistakes.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationWarning> {
        TargetValidator::new(&self.targets, &self.template_dir()).validate()
    }

    /// Register a lazily built [`TemplateHandler`] for every `[[targets]]`
    /// entry. Templates are read on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if a target name is already taken.
    pub fn register_targets(&self, registry: &HandlerRegistry) -> Result<(), RegistryError> {
        let template_dir = self.template_dir();
        for target in &self.targets {
            let target = target.clone();
            let dir = template_dir.clone();
            let name = target.name.clone();
            registry.register_lazy_handler(
                name,
                Box::new(move || {
                    let handler = TemplateHandler::from_config(&target, &dir)?;
                    Ok(Arc::new(handler) as Arc<dyn ApplicationHandler>)
                }),
            )?;
        }
        Ok(())
    }
}

/// Replace a leading `~` component with the home directory.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))
            else {
                return path.to_path_buf();
            };
            PathBuf::from(home).join(components.as_path())
        }
        _ => path.to_path_buf(),
    }
}
