//! Name-to-handler registry with lazy, exactly-once construction.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::ApplicationHandler;

/// Default threshold above which handler construction is logged as slow.
pub const DEFAULT_SLOW_INIT_THRESHOLD: Duration = Duration::from_millis(100);

/// Builds a handler on first use.
pub type HandlerFactory =
    Box<dyn Fn() -> anyhow::Result<Arc<dyn ApplicationHandler>> + Send + Sync>;

/// Errors raised by the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A handler with this name is already registered.
    #[error("handler '{0}' is already registered")]
    Duplicate(String),

    /// No handler is registered under this name.
    #[error("no handler registered for '{0}'")]
    NotFound(String),

    /// The lazy factory failed; a later lookup will retry.
    #[error("failed to initialise handler '{name}': {reason}")]
    InitFailed {
        /// Handler name.
        name: String,
        /// Factory error (with context chain).
        reason: String,
    },
}

enum HandlerSlot {
    Uninitialized(HandlerFactory),
    Ready {
        handler: Arc<dyn ApplicationHandler>,
        /// `None` for eagerly registered handlers.
        init_time: Option<Duration>,
    },
}

#[derive(Default)]
struct Table {
    slots: HashMap<String, Arc<RwLock<HandlerSlot>>>,
    order: Vec<String>,
}

/// Registry of application handlers keyed by target name.
///
/// The map lock is held only to look up or insert an entry; each entry has
/// its own lock, so constructing one handler never blocks lookups of another.
pub struct HandlerRegistry {
    table: RwLock<Table>,
    slow_init_threshold: Duration,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("names", &self.names())
            .field("slow_init_threshold", &self.slow_init_threshold)
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            slow_init_threshold: DEFAULT_SLOW_INIT_THRESHOLD,
        }
    }

    /// Builder-style setter for the slow-initialisation warning threshold.
    #[must_use]
    pub const fn with_slow_init_threshold(mut self, threshold: Duration) -> Self {
        self.slow_init_threshold = threshold;
        self
    }

    fn insert(&self, name: String, slot: HandlerSlot) -> Result<(), RegistryError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.slots.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        table.order.push(name.clone());
        table.slots.insert(name, Arc::new(RwLock::new(slot)));
        Ok(())
    }

    /// Register an already-constructed handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `name` is taken.
    pub fn register_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn ApplicationHandler>,
    ) -> Result<(), RegistryError> {
        self.insert(
            name.into(),
            HandlerSlot::Ready {
                handler,
                init_time: None,
            },
        )
    }

    /// Register a handler to be built by `factory` on first lookup.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `name` is taken.
    pub fn register_lazy_handler(
        &self,
        name: impl Into<String>,
        factory: HandlerFactory,
    ) -> Result<(), RegistryError> {
        self.insert(name.into(), HandlerSlot::Uninitialized(factory))
    }

    /// Look up a handler, constructing it on first use.
    ///
    /// Concurrent first lookups of the same name run the factory exactly
    /// once; the others wait on the entry's lock and share the result.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown names and
    /// [`RegistryError::InitFailed`] if the factory fails (the entry stays
    /// uninitialised so a later call retries).
    pub fn get_handler(&self, name: &str) -> Result<Arc<dyn ApplicationHandler>, RegistryError> {
        let slot = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if let HandlerSlot::Ready { handler, .. } =
            &*slot.read().unwrap_or_else(PoisonError::into_inner)
        {
            return Ok(Arc::clone(handler));
        }

        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        let (handler, elapsed) = match &*guard {
            HandlerSlot::Ready { handler, .. } => return Ok(Arc::clone(handler)),
            HandlerSlot::Uninitialized(factory) => {
                let start = Instant::now();
                let handler = factory().map_err(|e| RegistryError::InitFailed {
                    name: name.to_string(),
                    reason: format!("{e:#}"),
                })?;
                (handler, start.elapsed())
            }
        };
        if elapsed > self.slow_init_threshold {
            tracing::warn!("handler '{name}' took {elapsed:?} to initialise");
        } else {
            tracing::debug!("handler '{name}' initialised in {elapsed:?}");
        }
        *guard = HandlerSlot::Ready {
            handler: Arc::clone(&handler),
            init_time: Some(elapsed),
        };
        Ok(handler)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .contains_key(name)
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn supported_applications(&self) -> Vec<String> {
        let mut names = self.names();
        names.sort();
        names
    }

    /// How long the lazy factory for `name` took, once it has run.
    #[must_use]
    pub fn init_time(&self, name: &str) -> Option<Duration> {
        let slot = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .get(name)
            .cloned()?;
        let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
        match &*guard {
            HandlerSlot::Ready { init_time, .. } => *init_time,
            HandlerSlot::Uninitialized(_) => None,
        }
    }

    /// Whether `name` has been constructed.
    #[must_use]
    pub fn is_initialized(&self, name: &str) -> bool {
        let Some(slot) = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .get(name)
            .cloned()
        else {
            return false;
        };
        matches!(
            &*slot.read().unwrap_or_else(PoisonError::into_inner),
            HandlerSlot::Ready { .. }
        )
    }
}
