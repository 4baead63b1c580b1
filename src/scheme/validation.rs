//! Whole-scheme validation.

use super::{ColorScheme, REQUIRED_COLORS, parse_color};
use crate::error::ValidationError;

/// Validate a scheme before anything is rendered or written.
///
/// A scheme is valid iff its name is non-empty, every key in
/// [`REQUIRED_COLORS`] is present in `colors`, and every value in both
/// `colors` and `special` parses as a color. The mode is enforced by the
/// [`Mode`](super::Mode) type at parse time.
///
/// Missing keys are reported in [`REQUIRED_COLORS`] order; invalid values in
/// key order.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_scheme(scheme: &ColorScheme) -> Result<(), ValidationError> {
    if scheme.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if let Some(missing) = REQUIRED_COLORS
        .iter()
        .find(|key| !scheme.colors.contains_key(**key))
    {
        return Err(ValidationError::MissingColor((*missing).to_string()));
    }

    for (key, value) in scheme.colors.iter().chain(&scheme.special) {
        parse_color(value).map_err(|e| ValidationError::InvalidColor {
            key: key.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
