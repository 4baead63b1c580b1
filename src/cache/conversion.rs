//! Memoised color format conversion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::ValidationError;
use crate::scheme::{ColorFormat, parse_color};

/// Default number of memoised conversions.
pub const DEFAULT_CONVERSION_ENTRIES: usize = 4096;

/// Bounded map from `(input, format)` to the formatted color.
///
/// When full, an arbitrary entry is dropped to make room; conversions are
/// cheap to recompute so no recency is tracked.
#[derive(Debug)]
pub struct ConversionCache {
    entries: RwLock<HashMap<(String, ColorFormat), String>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ConversionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERSION_ENTRIES)
    }
}

impl ConversionCache {
    /// Create a cache holding at most `max_entries` conversions.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Format `color` (any accepted syntax) as `format`.
    ///
    /// # Errors
    ///
    /// Returns the parse failure if `color` is not a valid color.
    pub fn convert(&self, color: &str, format: ColorFormat) -> Result<String, ValidationError> {
        let key = (color.to_string(), format);
        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let formatted = parse_color(color)?.format(format);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.max_entries
            && !entries.contains_key(&key)
            && let Some(victim) = entries.keys().next().cloned()
        {
            entries.remove(&victim);
        }
        entries.insert(key, formatted.clone());
        Ok(formatted)
    }

    /// `(hits, misses)` since creation.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Number of memoised conversions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been memoised yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every memoised conversion.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn converts_and_memoises() {
        let cache = ConversionCache::new(16);
        assert_eq!(cache.convert("#ff0000", ColorFormat::Rgb).unwrap(), "rgb(255, 0, 0)");
        assert_eq!(cache.convert("#ff0000", ColorFormat::Rgb).unwrap(), "rgb(255, 0, 0)");
        assert_eq!(cache.counters(), (1, 1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn format_is_part_of_the_key() {
        let cache = ConversionCache::new(16);
        cache.convert("#ff0000", ColorFormat::Rgb).unwrap();
        assert_eq!(cache.convert("#ff0000", ColorFormat::HexBare).unwrap(), "ff0000");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn stays_within_bound() {
        let cache = ConversionCache::new(4);
        for i in 0..20u8 {
            cache.convert(&format!("rgb({i}, 0, 0)"), ColorFormat::Hex).unwrap();
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn invalid_input_is_not_cached() {
        let cache = ConversionCache::default();
        assert!(cache.convert("nope", ColorFormat::Hex).is_err());
        assert!(cache.is_empty());
    }
}
