//! Command: list configured targets.

use anyhow::Result;

use super::CommandSetup;
use crate::cli::GlobalOpts;
use crate::logging::Logger;

/// Print every configured target with its install state and output path.
///
/// Building a handler reads its template, so a target whose template is
/// missing is listed with the error instead.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded.
pub fn run(global: &GlobalOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let registry = setup.registry()?;

    log.stage("Targets");
    let names = registry.supported_applications();
    if names.is_empty() {
        log.info(&format!(
            "no targets configured in {}",
            setup.config_path.display()
        ));
        return Ok(());
    }
    for name in names {
        match registry.get_handler(&name) {
            Ok(handler) => {
                let state = if handler.is_installed() {
                    "installed"
                } else {
                    "not installed"
                };
                log.info(&format!(
                    "{name} [{state}, {}] -> {}",
                    handler.color_format(),
                    handler.output_path().display()
                ));
            }
            Err(e) => log.warn(&format!("{name}: {e}")),
        }
    }
    Ok(())
}
