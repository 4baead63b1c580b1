//! Command: validate a color scheme.

use anyhow::{Context as _, Result};

use crate::cli::ValidateOpts;
use crate::logging::Logger;
use crate::scheme::{ColorScheme, validate_scheme};

/// Load and validate the scheme named in `opts` without touching anything.
///
/// # Errors
///
/// Returns an error if the scheme cannot be read or fails validation.
pub fn run(opts: &ValidateOpts, log: &Logger) -> Result<()> {
    log.stage("Validating color scheme");
    let scheme = ColorScheme::load(&opts.scheme)?;
    validate_scheme(&scheme)
        .with_context(|| format!("{} is not a valid color scheme", opts.scheme.display()))?;
    log.info(&format!(
        "'{}' ({}) is valid: {} colors, {} special",
        scheme.name,
        scheme.mode,
        scheme.colors.len(),
        scheme.special.len()
    ));
    Ok(())
}
