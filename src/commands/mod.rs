pub mod apply;
pub mod cache;
pub mod list;
pub mod validate;
pub mod version;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::GlobalOpts;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::handlers::HandlerRegistry;
use crate::logging::{Log, Logger};

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates config path resolution, loading and validation so that each
/// command does not have to repeat the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    pub config_path: PathBuf,
    pub config: EngineConfig,
}

impl CommandSetup {
    /// Resolve the config path, load it, and log any validation warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but fails to parse.
    pub fn init(global: &GlobalOpts, log: &Logger) -> Result<Self> {
        let config_path = global
            .config
            .clone()
            .unwrap_or_else(EngineConfig::default_path);

        log.stage("Loading configuration");
        let config = EngineConfig::load(&config_path)?;
        log.debug(&format!("config: {}", config_path.display()));
        log.debug(&format!("templates: {}", config.template_dir().display()));
        log.info(&format!("loaded {} target(s)", config.targets.len()));

        let warnings = config.validate();
        if !warnings.is_empty() {
            log.warn(&format!(
                "found {} configuration warning(s):",
                warnings.len()
            ));
            for warning in &warnings {
                log.warn(&format!("  {warning}"));
            }
        }

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Registry with every configured target registered lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if two targets share a name.
    pub fn registry(&self) -> Result<Arc<HandlerRegistry>> {
        let registry =
            HandlerRegistry::new().with_slow_init_threshold(self.config.slow_init_threshold());
        self.config.register_targets(&registry)?;
        Ok(Arc::new(registry))
    }

    /// Engine built from the loaded configuration, logging through `log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be built.
    pub fn engine(&self, log: Arc<dyn Log>) -> Result<Engine> {
        Ok(Engine::from_config(&self.config, self.registry()?).with_log(log))
    }
}
