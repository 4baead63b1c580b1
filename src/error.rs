//! Domain-specific error types for the theme engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return typed errors (e.g., [`ValidationError`],
//! [`TargetError`]) while command handlers at the CLI boundary convert them
//! to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! EngineError
//! ├── Validation(ValidationError)   fatal, raised before any I/O
//! ├── UnknownApplication(String)    explicit target not registered
//! ├── TargetsFailed(Vec<TargetFailure>)
//! ├── Operation { target, cause }   non-transactional write failed
//! └── Transaction(TransactionError) rollback outcome
//! ```
//!
//! Cache and backup failures never surface here; they are logged as warnings.

use thiserror::Error;

pub use crate::cache::CacheError;
pub use crate::handlers::RegistryError;
pub use crate::transaction::{BackupError, TransactionError};

/// Top-level error type for the theme engine.
///
/// Aggregates domain-specific sub-errors and is convertible to
/// [`anyhow::Error`] for use at CLI command boundaries.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The color scheme failed validation; nothing was touched.
    #[error("Invalid color scheme: {0}")]
    Validation(#[from] ValidationError),

    /// An explicitly requested application has no registered handler.
    #[error("Unknown application '{0}'")]
    UnknownApplication(String),

    /// One or more targets failed to render; every failing target is named.
    #[error("{}", format_target_failures(.0))]
    TargetsFailed(Vec<TargetFailure>),

    /// A staged operation failed outside a transaction.
    #[error("Applying '{target}' failed: {cause:#}")]
    Operation {
        /// Target whose operations were being executed.
        target: String,
        /// Underlying failure.
        cause: anyhow::Error,
    },

    /// The transaction failed and was rolled back (possibly incompletely).
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

impl EngineError {
    /// Names of the targets that failed, if this is an aggregate failure.
    #[must_use]
    pub fn failed_targets(&self) -> Vec<&str> {
        match self {
            Self::TargetsFailed(failures) => failures.iter().map(|f| f.target.as_str()).collect(),
            Self::Operation { target, .. } => vec![target.as_str()],
            _ => Vec::new(),
        }
    }
}

/// A single target that failed during dispatch.
#[derive(Debug)]
pub struct TargetFailure {
    /// Target (application) name.
    pub target: String,
    /// What went wrong.
    pub error: TargetError,
}

impl std::fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

fn format_target_failures(failures: &[TargetFailure]) -> String {
    let names: Vec<&str> = failures.iter().map(|f| f.target.as_str()).collect();
    let details: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!(
        "{} target(s) failed ({}): {}",
        failures.len(),
        names.join(", "),
        details.join("; ")
    )
}

/// Why a single target did not complete.
#[derive(Error, Debug)]
pub enum TargetError {
    /// Cancellation was observed before the target started.
    #[error("cancelled before start")]
    Cancelled,

    /// The handler could not be obtained from the registry.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// The mapped colors could not be converted to the handler's format.
    #[error("color conversion failed: {0}")]
    Conversion(#[from] ValidationError),

    /// The handler rejected the mapped colors.
    #[error("colors rejected: {0:#}")]
    Rejected(anyhow::Error),

    /// The handler failed while rendering or staging.
    #[error("{0:#}")]
    Failed(anyhow::Error),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Errors raised while validating colors and color schemes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The scheme has an empty name.
    #[error("scheme name must not be empty")]
    EmptyName,

    /// The scheme mode is not one of the supported values.
    #[error("invalid mode '{0}': must be one of dark, light")]
    InvalidMode(String),

    /// A required color key is absent.
    #[error("missing required color '{0}'")]
    MissingColor(String),

    /// A color value under `key` failed to parse.
    #[error("invalid color '{key}': {reason}")]
    InvalidColor {
        /// Color key in the scheme.
        key: String,
        /// Parse failure description.
        reason: String,
    },

    /// The value is not in any recognised color syntax.
    #[error("unrecognised color syntax '{0}'")]
    UnrecognisedSyntax(String),

    /// The syntax was recognised but the value is malformed.
    #[error("malformed color '{value}': {reason}")]
    Malformed {
        /// Offending input.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A numeric component is outside its permitted range.
    #[error("{component} out of range in '{value}' (expected {range})")]
    OutOfRange {
        /// Offending input.
        value: String,
        /// Component name (`red`, `hue`, `alpha`, ...).
        component: &'static str,
        /// Human-readable permitted range.
        range: &'static str,
    },
}
