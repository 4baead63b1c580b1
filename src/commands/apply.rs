//! Command: apply a color scheme.

use anyhow::Result;
use std::sync::Arc;

use super::CommandSetup;
use crate::cli::{ApplyOpts, GlobalOpts};
use crate::engine::{ApplyOptions, CancellationToken};
use crate::logging::{Log, Logger};
use crate::scheme::ColorScheme;

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if configuration or the scheme cannot be loaded, the
/// scheme is invalid, or one or more targets failed.
pub fn run(
    global: &GlobalOpts,
    opts: &ApplyOpts,
    verbose: bool,
    cancel: &CancellationToken,
    log: &Arc<Logger>,
) -> Result<()> {
    let version = option_env!("THEME_ENGINE_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    log.info(&format!("theme-engine {version}"));

    let setup = CommandSetup::init(global, log)?;

    log.stage("Loading color scheme");
    let scheme = ColorScheme::load(&opts.scheme)?;
    log.info(&format!("scheme: {} ({})", scheme.name, scheme.mode));

    let engine = setup.engine(Arc::clone(log) as Arc<dyn Log>)?;
    let options = apply_options(opts, verbose);
    let result = if opts.best_effort {
        engine.apply_all_themes(cancel, &scheme, &options)
    } else {
        engine.apply_theme(cancel, &scheme, &options)
    };

    log.print_summary();
    let report = result?;
    if let Some(id) = &report.backup_id {
        log.debug(&format!("backup: {id}"));
    }

    let count = report.failed().len();
    if count > 0 {
        anyhow::bail!("{count} target(s) failed");
    }
    Ok(())
}

fn apply_options(opts: &ApplyOpts, verbose: bool) -> ApplyOptions {
    ApplyOptions {
        applications: opts.only.clone(),
        dry_run: opts.dry_run,
        force: opts.force,
        parallel: opts.parallel,
        template_dir: opts.template_dir.clone(),
        verbose,
        no_backup: opts.no_backup,
    }
}
