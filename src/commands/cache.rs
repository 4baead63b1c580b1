//! Command: inspect or clear the persisted render cache.

use anyhow::Result;
use std::time::Duration;

use super::CommandSetup;
use crate::cache::CacheStore;
use crate::cli::{CacheAction, GlobalOpts};
use crate::logging::Logger;

/// Run `cache stats` or `cache clear`.
///
/// Only a persisted cache outlives the process, so with `persist = false`
/// there is nothing to show or clear.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded.
pub fn run(global: &GlobalOpts, action: CacheAction, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let options = setup.config.cache_options();
    let Some(dir) = options.persist_dir.clone() else {
        log.info("render cache is not persisted (set [cache] persist = true)");
        return Ok(());
    };

    log.stage("Render cache");
    let store: CacheStore<Vec<u8>> = CacheStore::new(options.with_sweep_interval(Duration::ZERO));
    let stats = store.stats();
    match action {
        CacheAction::Stats => {
            log.info(&format!(
                "{} entries, {} bytes of {} allowed",
                stats.entry_count,
                stats.total_size,
                setup.config.cache.max_size_bytes
            ));
            log.info(&format!("location: {}", dir.display()));
        }
        CacheAction::Clear => {
            store.clear();
            store.flush();
            log.info(&format!(
                "removed {} cached render(s) from {}",
                stats.entry_count,
                dir.display()
            ));
        }
    }
    Ok(())
}
