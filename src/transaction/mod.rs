//! All-or-nothing execution of staged operations.
//!
//! A [`Transaction`] runs its operations in registration order. If one
//! fails, every operation that already ran is rolled back in reverse order
//! and the pre-execution snapshot (if any) is restored. Rollback problems are
//! collected and reported together rather than stopping the rollback.

mod backup;
mod operation;

pub use backup::{BackedUpFile, BackupError, BackupManager, BackupManifest, DEFAULT_RETENTION};
pub use operation::{Batch, CommandOp, FileWrite, Operation, OperationKind, UndoFn};

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Something that could not be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    /// What was being undone.
    pub description: String,
    /// Why it failed.
    pub reason: String,
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.description, self.reason)
    }
}

fn join_failures(failures: &[RollbackFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by [`Transaction::execute`] and [`Transaction::rollback`].
#[derive(Error, Debug)]
pub enum TransactionError {
    /// `execute` or `rollback` was called on a finished transaction.
    #[error("transaction has already been executed")]
    AlreadyExecuted,

    /// An operation failed and every change was undone.
    #[error("operation {index} ({description}) failed: {cause:#}; all changes were rolled back")]
    OperationFailed {
        /// Zero-based position of the failing operation.
        index: usize,
        /// Description of the failing operation.
        description: String,
        /// Why it failed.
        cause: anyhow::Error,
    },

    /// An operation failed and the rollback did not fully succeed.
    #[error(
        "operation {index} ({description}) failed: {cause:#}; rollback incomplete, manual intervention required: {}",
        join_failures(.rollback_errors)
    )]
    RollbackIncomplete {
        /// Zero-based position of the failing operation.
        index: usize,
        /// Description of the failing operation.
        description: String,
        /// Why it failed.
        cause: anyhow::Error,
        /// Everything that could not be undone.
        rollback_errors: Vec<RollbackFailure>,
    },

    /// An explicit rollback did not fully succeed.
    #[error("rollback incomplete, manual intervention required: {}", join_failures(.0))]
    AbortIncomplete(Vec<RollbackFailure>),
}

impl TransactionError {
    /// Whether files may have been left in a mixed state.
    #[must_use]
    pub const fn needs_manual_intervention(&self) -> bool {
        matches!(self, Self::RollbackIncomplete { .. } | Self::AbortIncomplete(_))
    }
}

/// Lifecycle of a transaction; it only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Accepting operations.
    Pending,
    /// Every operation succeeded.
    Committed,
    /// Changes were undone (fully or not).
    RolledBack,
}

/// An ordered, single-use list of operations.
#[derive(Debug)]
pub struct Transaction {
    operations: Mutex<Vec<Operation>>,
    executed: usize,
    state: State,
    backups: Option<Arc<BackupManager>>,
    snapshots: Vec<BackupManifest>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Create an empty transaction with no snapshot support.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
            executed: 0,
            state: State::Pending,
            backups: None,
            snapshots: Vec::new(),
        }
    }

    /// Snapshot touched files through `manager` before executing.
    #[must_use]
    pub fn with_backup_manager(mut self, manager: Arc<BackupManager>) -> Self {
        self.backups = Some(manager);
        self
    }

    /// Use an already-taken backup as the snapshot; only paths it does not
    /// cover are snapshotted again.
    #[must_use]
    pub fn with_snapshot(mut self, manifest: BackupManifest) -> Self {
        self.snapshots.push(manifest);
        self
    }

    /// Append an operation.
    pub fn add_operation(&self, operation: Operation) {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(operation);
    }

    /// Number of operations added so far.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of operations that have run successfully (and not been undone).
    #[must_use]
    pub const fn executed_count(&self) -> usize {
        self.executed
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// How many operations changed something when executed.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|op| op.changed())
            .count()
    }

    /// Consume the transaction, returning its operations in order.
    #[must_use]
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run every operation in order, rolling back on the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::OperationFailed`] when the rollback fully
    /// succeeded, [`TransactionError::RollbackIncomplete`] when it did not,
    /// and [`TransactionError::AlreadyExecuted`] on a second call.
    pub fn execute(&mut self) -> Result<(), TransactionError> {
        if self.state != State::Pending {
            return Err(TransactionError::AlreadyExecuted);
        }
        self.take_snapshot();

        let operations = self
            .operations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let mut failure = None;
        for (index, op) in operations.iter_mut().enumerate() {
            tracing::debug!("executing operation {index}: {}", op.description());
            if let Err(cause) = op.execute() {
                failure = Some((index, op.description(), cause));
                break;
            }
            self.executed = index + 1;
        }

        let Some((index, description, cause)) = failure else {
            self.state = State::Committed;
            return Ok(());
        };
        tracing::warn!("operation {index} ({description}) failed; rolling back");
        let rollback_errors = self.rollback_from(index);
        if rollback_errors.is_empty() {
            Err(TransactionError::OperationFailed {
                index,
                description,
                cause,
            })
        } else {
            Err(TransactionError::RollbackIncomplete {
                index,
                description,
                cause,
                rollback_errors,
            })
        }
    }

    /// Abandon a pending transaction, restoring the snapshot.
    ///
    /// Operations that never ran are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::AbortIncomplete`] if the snapshot could
    /// not be fully restored, or [`TransactionError::AlreadyExecuted`] if the
    /// transaction already finished.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        if self.state != State::Pending {
            return Err(TransactionError::AlreadyExecuted);
        }
        let failures = self.rollback_from(self.executed);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransactionError::AbortIncomplete(failures))
        }
    }

    /// Undo operations `0..failed_index` in reverse, then restore snapshots.
    fn rollback_from(&mut self, failed_index: usize) -> Vec<RollbackFailure> {
        self.state = State::RolledBack;
        let operations = self
            .operations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        let mut failures: Vec<RollbackFailure> = operations
            .iter_mut()
            .take(failed_index)
            .rev()
            .filter_map(|op| {
                op.rollback().err().map(|e| RollbackFailure {
                    description: op.description(),
                    reason: format!("{e:#}"),
                })
            })
            .collect();
        self.executed = 0;

        if let Some(manager) = &self.backups {
            for manifest in self.snapshots.iter().rev() {
                if let Err(e) = manager.restore(manifest) {
                    failures.push(RollbackFailure {
                        description: format!("restore backup {}", manifest.id),
                        reason: e.to_string(),
                    });
                }
            }
        }
        for failure in &failures {
            tracing::error!("rollback failed: {failure}");
        }
        failures
    }

    /// Back up every touched path not already covered by a snapshot.
    /// Failure only costs the safety net, so it is logged, not returned.
    fn take_snapshot(&mut self) {
        let Some(manager) = &self.backups else {
            return;
        };
        let operations = self
            .operations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<PathBuf> = operations
            .iter()
            .flat_map(Operation::touched_paths)
            .filter(|path| !self.snapshots.iter().any(|m| m.covers(path)))
            .map(std::path::Path::to_path_buf)
            .collect();
        paths.sort();
        paths.dedup();
        if paths.is_empty() {
            return;
        }
        match manager.create(&paths) {
            Ok(manifest) => self.snapshots.push(manifest),
            Err(e) => tracing::warn!("pre-transaction snapshot failed, continuing without it: {e}"),
        }
    }
}
