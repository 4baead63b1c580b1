//! Structured logger with dry-run awareness and summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::subscriber::{DRY_RUN_TARGET, RESULT_TARGET, STAGE_TARGET};
use super::types::{Log, TargetEntry, TargetStatus};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Logger that forwards to [`tracing`] and collects per-target results.
///
/// Output reaches the console and the persistent log file through the
/// subscriber installed by [`init_subscriber`](super::init_subscriber).
#[derive(Debug)]
pub struct Logger {
    targets: Mutex<Vec<TargetEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a logger for `command`; the log file path is shown in the summary.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            targets: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Create a logger that reports `path` as its log file.
    #[cfg(test)]
    pub(crate) const fn with_log_file(path: PathBuf) -> Self {
        Self {
            targets: Mutex::new(Vec::new()),
            log_file: Some(path),
        }
    }

    /// Log file path, if available.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (console only when verbose; always in the log file).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: DRY_RUN_TARGET, "{msg}");
    }

    /// Record a target result for the summary.
    ///
    /// The result is also logged at debug level so the log file keeps every
    /// intermediate status, not only the final summary.
    pub fn record_target(&self, name: &str, status: TargetStatus, message: Option<&str>) {
        tracing::debug!(
            target: RESULT_TARGET,
            app = name,
            status = %status,
            "{}",
            message.unwrap_or_default()
        );
        if let Ok(mut guard) = self.targets.lock() {
            guard.push(TargetEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Every recorded target result, in recording order.
    #[must_use]
    pub fn target_entries(&self) -> Vec<TargetEntry> {
        self.targets.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Number of failed targets.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.targets.lock().map_or(0, |guard| {
            guard
                .iter()
                .filter(|t| t.status == TargetStatus::Failed)
                .count()
        })
    }

    /// Print the summary of all recorded targets.
    pub fn print_summary(&self) {
        let targets = self.target_entries();
        if targets.is_empty() {
            return;
        }

        println!();
        self.stage("Summary");

        let mut applied = 0u32;
        let mut not_installed = 0u32;
        let mut cancelled = 0u32;
        let mut dry_run = 0u32;
        let mut failed = 0u32;

        for target in &targets {
            let (icon, color) = match target.status {
                TargetStatus::Applied => {
                    applied += 1;
                    ("✓", "\x1b[32m")
                }
                TargetStatus::NotInstalled => {
                    not_installed += 1;
                    ("·", "\x1b[2m")
                }
                TargetStatus::Cancelled => {
                    cancelled += 1;
                    ("○", "\x1b[33m")
                }
                TargetStatus::DryRun => {
                    dry_run += 1;
                    ("~", "\x1b[37m")
                }
                TargetStatus::Failed => {
                    failed += 1;
                    ("✗", "\x1b[31m")
                }
            };

            let suffix = target
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));

            self.info(&format!("{color}{icon} {}{suffix}\x1b[0m", target.name));
        }

        println!();
        let total = applied + not_installed + cancelled + dry_run + failed;
        self.info(&format!(
            "{total} targets: \x1b[32m{applied} applied\x1b[0m, \x1b[2m{not_installed} not installed\x1b[0m, \x1b[33m{cancelled} cancelled\x1b[0m, \x1b[37m{dry_run} dry-run\x1b[0m, \x1b[31m{failed} failed\x1b[0m"
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record_target(&self, name: &str, status: TargetStatus, message: Option<&str>) {
        self.record_target(name, status, message);
    }
}
