//! Buffered logger for parallel target dispatch.
use std::sync::{Arc, Mutex, PoisonError};

use super::types::{Log, TargetStatus};

/// A single buffered log entry, replayed when flushed.
#[derive(Debug, Clone)]
enum LogEntry {
    Stage(String),
    Info(String),
    Debug(String),
    Warn(String),
    Error(String),
    DryRun(String),
}

impl LogEntry {
    fn replay(&self, log: &dyn Log) {
        match self {
            Self::Stage(msg) => log.stage(msg),
            Self::Info(msg) => log.info(msg),
            Self::Debug(msg) => log.debug(msg),
            Self::Warn(msg) => log.warn(msg),
            Self::Error(msg) => log.error(msg),
            Self::DryRun(msg) => log.dry_run(msg),
        }
    }
}

/// Implement the display methods of [`Log`] by buffering each message as the
/// corresponding [`LogEntry`] variant.
macro_rules! buffer_log_methods {
    ($($method:ident => $variant:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(LogEntry::$variant(msg.to_string()));
            }
        )+
    };
}

/// Captures one target's output in memory so parallel targets do not
/// interleave on the console.
///
/// [`record_target`](Log::record_target) is forwarded directly because
/// summary collection is already thread-safe.
#[derive(Debug)]
pub struct BufferedLog {
    inner: Arc<dyn Log>,
    entries: Mutex<Vec<LogEntry>>,
}

impl BufferedLog {
    /// Create a buffer in front of `inner`.
    #[must_use]
    pub const fn new(inner: Arc<dyn Log>) -> Self {
        Self {
            inner,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Replay and discard every buffered entry, in order.
    pub fn flush(&self) {
        let entries =
            std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner));
        for entry in &entries {
            entry.replay(self.inner.as_ref());
        }
    }

    /// Number of entries waiting to be flushed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Log for BufferedLog {
    buffer_log_methods! {
        stage   => Stage,
        info    => Info,
        debug   => Debug,
        warn    => Warn,
        error   => Error,
        dry_run => DryRun,
    }

    fn record_target(&self, name: &str, status: TargetStatus, message: Option<&str>) {
        self.inner.record_target(name, status, message);
    }
}
