//! Core logging types: target entries, status, and the [`Log`] trait.

use std::fmt;

/// Per-target result for summary reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    /// Target (application) name.
    pub name: String,
    /// Final status of the target.
    pub status: TargetStatus,
    /// Optional detail message (e.g., skip reason or error description).
    pub message: Option<String>,
}

/// Status of a target after an apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Files were written (or the target was applied with nothing to change).
    Applied,
    /// The application is not installed; nothing was done.
    NotInstalled,
    /// The apply was cancelled before this target ran.
    Cancelled,
    /// Rendered in dry-run mode; nothing was written.
    DryRun,
    /// Rendering or writing failed.
    Failed,
}

impl TargetStatus {
    /// Short lowercase label used in summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::NotInstalled => "not installed",
            Self::Cancelled => "cancelled",
            Self::DryRun => "dry-run",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstraction over logging backends.
///
/// Both [`Logger`](super::logger::Logger) (direct output) and
/// [`BufferedLog`](super::buffered::BufferedLog) (deferred output for
/// parallel targets) implement this trait, so handler code can log without
/// knowing whether output is immediate or buffered.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a target result for the summary.
    fn record_target(&self, name: &str, status: TargetStatus, message: Option<&str>);
}

impl fmt::Debug for dyn Log + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Log")
    }
}
