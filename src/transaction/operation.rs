//! Reversible side effects staged by handlers.
//!
//! [`Operation`] is a closed set: file writes, external commands and ordered
//! batches of either. Each variant remembers enough about the state it
//! replaced to undo itself.

use anyhow::{Context as _, Result};
use std::fmt;
use std::fs::Permissions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::exec::Executor;
use crate::fs::FileSystemOps;

/// Discriminant of an [`Operation`], for logs and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Atomic file replacement.
    FileWrite,
    /// External command.
    Command,
    /// Ordered group of operations.
    Batch,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FileWrite => "file-write",
            Self::Command => "command",
            Self::Batch => "batch",
        })
    }
}

/// A reversible unit of work.
#[derive(Debug)]
pub enum Operation {
    /// Replace a file's contents.
    FileWrite(FileWrite),
    /// Run an external command.
    Command(CommandOp),
    /// Run operations in order; roll back in reverse.
    Batch(Batch),
}

impl Operation {
    /// Perform the operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the side effect could not be applied. A failed
    /// batch has already undone its own completed children.
    pub fn execute(&mut self) -> Result<()> {
        match self {
            Self::FileWrite(op) => op.execute(),
            Self::Command(op) => op.execute(),
            Self::Batch(op) => op.execute(),
        }
    }

    /// Undo a successful [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// Returns an error if the prior state could not be restored.
    pub fn rollback(&mut self) -> Result<()> {
        match self {
            Self::FileWrite(op) => op.rollback(),
            Self::Command(op) => op.rollback(),
            Self::Batch(op) => op.rollback(),
        }
    }

    /// One-line human description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::FileWrite(op) => format!("write {}", op.path.display()),
            Self::Command(op) => format!("run {}", op.command_line()),
            Self::Batch(op) => format!("{} ({} operations)", op.label, op.operations.len()),
        }
    }

    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::FileWrite(_) => OperationKind::FileWrite,
            Self::Command(_) => OperationKind::Command,
            Self::Batch(_) => OperationKind::Batch,
        }
    }

    /// Files this operation may modify, including inside batches.
    #[must_use]
    pub fn touched_paths(&self) -> Vec<&Path> {
        match self {
            Self::FileWrite(op) => vec![op.path.as_path()],
            Self::Command(_) => Vec::new(),
            Self::Batch(op) => op.operations.iter().flat_map(Self::touched_paths).collect(),
        }
    }

    /// Whether executing changed anything on disk (or ran a command).
    #[must_use]
    pub fn changed(&self) -> bool {
        match self {
            Self::FileWrite(op) => op.written,
            Self::Command(op) => op.executed,
            Self::Batch(op) => op.operations.iter().any(Self::changed),
        }
    }
}

/// What a file looked like before it was written.
#[derive(Debug, Clone)]
enum Prior {
    Absent,
    Present {
        bytes: Vec<u8>,
        permissions: Option<Permissions>,
    },
}

/// Atomic replacement of a file's contents.
#[derive(Debug)]
pub struct FileWrite {
    path: PathBuf,
    contents: Vec<u8>,
    force: bool,
    fs: Arc<dyn FileSystemOps>,
    prior: Option<Prior>,
    written: bool,
}

impl FileWrite {
    /// Stage a write of `contents` to `path` through `fs`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, contents: Vec<u8>, fs: Arc<dyn FileSystemOps>) -> Self {
        Self {
            path: path.into(),
            contents,
            force: false,
            fs,
            prior: None,
            written: false,
        }
    }

    /// Write even when the file already holds `contents`.
    #[must_use]
    pub const fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn capture(&self) -> Result<Prior> {
        match self.fs.read(&self.path) {
            Ok(bytes) => Ok(Prior::Present {
                bytes,
                permissions: self.fs.permissions(&self.path).ok(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Prior::Absent),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn execute(&mut self) -> Result<()> {
        let prior = self.capture()?;
        let unchanged = matches!(&prior, Prior::Present { bytes, .. } if *bytes == self.contents);
        self.prior = Some(prior);
        if unchanged && !self.force {
            tracing::debug!("{} already up to date", self.path.display());
            return Ok(());
        }
        self.fs
            .atomic_write(&self.path, &self.contents)
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.written = true;
        if let Some(Prior::Present {
            permissions: Some(permissions),
            ..
        }) = &self.prior
            && let Err(e) = self.fs.set_permissions(&self.path, permissions.clone())
        {
            tracing::warn!("could not keep permissions of {}: {e}", self.path.display());
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.written {
            return Ok(());
        }
        match &self.prior {
            Some(Prior::Present { bytes, permissions }) => {
                self.fs
                    .atomic_write(&self.path, bytes)
                    .with_context(|| format!("restoring {}", self.path.display()))?;
                if let Some(permissions) = permissions {
                    self.fs
                        .set_permissions(&self.path, permissions.clone())
                        .with_context(|| format!("restoring permissions of {}", self.path.display()))?;
                }
            }
            Some(Prior::Absent) | None => match self.fs.remove(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("removing {}", self.path.display()));
                }
            },
        }
        self.written = false;
        Ok(())
    }
}

/// Undo action for a [`CommandOp`].
pub type UndoFn = Box<dyn FnMut() -> Result<()> + Send>;

/// An external command with an optional undo action.
pub struct CommandOp {
    program: String,
    args: Vec<String>,
    executor: Arc<dyn Executor>,
    undo: Option<UndoFn>,
    executed: bool,
}

impl fmt::Debug for CommandOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandOp")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("has_undo", &self.undo.is_some())
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

impl CommandOp {
    /// Stage `program args...`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            program: program.into(),
            args,
            executor,
            undo: None,
            executed: false,
        }
    }

    /// Attach an undo action run on rollback.
    #[must_use]
    pub fn with_undo(mut self, undo: UndoFn) -> Self {
        self.undo = Some(undo);
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn execute(&mut self) -> Result<()> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        self.executor.run(&self.program, &args)?;
        self.executed = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.executed {
            return Ok(());
        }
        if let Some(undo) = self.undo.as_mut() {
            undo().with_context(|| format!("undoing {}", self.command_line()))?;
        } else {
            tracing::debug!("'{}' has no undo action", self.command_line());
        }
        self.executed = false;
        Ok(())
    }
}

/// Operations executed in order and rolled back in reverse.
#[derive(Debug)]
pub struct Batch {
    label: String,
    operations: Vec<Operation>,
    executed: usize,
}

impl Batch {
    /// Group `operations` under `label`.
    #[must_use]
    pub fn new(label: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            label: label.into(),
            operations,
            executed: 0,
        }
    }

    fn execute(&mut self) -> Result<()> {
        for index in 0..self.operations.len() {
            let Some(op) = self.operations.get_mut(index) else {
                break;
            };
            if let Err(err) = op.execute() {
                let description = op.description();
                self.executed = index;
                let undo_errors = self.rollback_executed();
                let mut err = err.context(format!("{}: {description}", self.label));
                if !undo_errors.is_empty() {
                    err = err.context(format!(
                        "batch rollback incomplete: {}",
                        undo_errors.join("; ")
                    ));
                }
                return Err(err);
            }
        }
        self.executed = self.operations.len();
        Ok(())
    }

    fn rollback_executed(&mut self) -> Vec<String> {
        let executed = self.executed;
        let errors = self
            .operations
            .iter_mut()
            .take(executed)
            .rev()
            .filter_map(|op| op.rollback().err().map(|e| format!("{e:#}")))
            .collect();
        self.executed = 0;
        errors
    }

    fn rollback(&mut self) -> Result<()> {
        let errors = self.rollback_executed();
        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{}: {}", self.label, errors.join("; "))
        }
    }
}
