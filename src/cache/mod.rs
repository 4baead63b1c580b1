//! In-memory LRU/TTL cache with optional disk persistence, plus the color
//! conversion cache.
//!
//! The engine keeps rendered target output in a [`CacheStore<Vec<u8>>`] keyed
//! by [`target_key`], so applying an identical scheme twice renders once.

mod conversion;
mod disk;
mod key;
mod store;

pub use conversion::{ConversionCache, DEFAULT_CONVERSION_ENTRIES};
pub use key::{hash_hex, target_key};
pub use store::{CacheStats, CacheStore};

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default byte budget (10 MiB).
pub const DEFAULT_MAX_SIZE: usize = 10 * 1024 * 1024;
/// Default time-to-live (24 h).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default sweep interval (1 h).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Tuning knobs for a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Total byte budget across all entries.
    pub max_size: usize,
    /// Entries older than this are treated as absent and swept.
    pub ttl: Duration,
    /// How often the background sweeper runs. `Duration::ZERO` disables it.
    pub sweep_interval: Duration,
    /// Directory for persisted entries, if persistence is enabled.
    pub persist_dir: Option<PathBuf>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            persist_dir: None,
        }
    }
}

impl CacheOptions {
    /// Builder-style setter for the byte budget.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Builder-style setter for the TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Builder-style setter for the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable persistence under `dir`.
    #[must_use]
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }
}

/// Errors raised by cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The value alone exceeds the cache's byte budget.
    #[error("entry '{key}' is {size} bytes, larger than the cache capacity of {capacity} bytes")]
    TooLarge {
        /// Rejected key.
        key: String,
        /// Size of the rejected value.
        size: usize,
        /// Configured byte budget.
        capacity: usize,
    },

    /// An invalidation pattern is not a valid glob.
    #[error("invalid cache key pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Parser message.
        reason: String,
    },
}
