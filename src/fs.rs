//! Filesystem operation abstractions for dependency injection.
//!
//! Provides the [`FileSystemOps`] trait so that operations can be unit-tested
//! without touching the real filesystem, or with injected failures.
//! Production code uses [`SystemFileSystemOps`]; tests use `FaultyFileSystemOps`.

use std::fs::Permissions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Abstraction over the filesystem primitives used by file-write operations.
///
/// Every mutation goes through [`atomic_write`](Self::atomic_write) so a
/// reader never observes a half-written configuration file.
pub trait FileSystemOps: Send + Sync + std::fmt::Debug {
    /// Read the full contents of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be read.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the contents of `path` with `contents` (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// temporary file cannot be written, or the rename fails.
    fn atomic_write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Remove the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Read the permissions of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    fn permissions(&self, path: &Path) -> io::Result<Permissions>;

    /// Apply `permissions` to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the permissions cannot be changed.
    fn set_permissions(&self, path: &Path, permissions: Permissions) -> io::Result<()>;
}

/// Production [`FileSystemOps`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default)]
pub struct SystemFileSystemOps;

impl FileSystemOps for SystemFileSystemOps {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn atomic_write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        atomic_write(path, contents)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn permissions(&self, path: &Path) -> io::Result<Permissions> {
        std::fs::metadata(path).map(|m| m.permissions())
    }

    fn set_permissions(&self, path: &Path, permissions: Permissions) -> io::Result<()> {
        std::fs::set_permissions(path, permissions)
    }
}

/// Distinguishes temp files created by concurrent writers in one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary sibling path used while writing `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy().into_owned());
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.tmp-{}-{seq}", std::process::id()))
}

/// Write `contents` to `path` atomically.
///
/// The data is written to a temporary file in the same directory, flushed to
/// disk, and renamed over `path`.  On failure the temporary file is removed
/// and `path` is left untouched.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the temporary
/// file cannot be written, or the rename fails.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write as _;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(path);
    let written = std::fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// [`FileSystemOps`] double that behaves like the real filesystem except for
/// configured paths, whose writes or removals fail.
///
/// # Example
///
/// ```ignore
/// let fs = FaultyFileSystemOps::new().fail_writes_to("/tmp/x/second.conf");
/// ```
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FaultyFileSystemOps {
    failing_writes: Vec<PathBuf>,
    failing_removes: Vec<PathBuf>,
    writes: std::sync::Mutex<Vec<PathBuf>>,
}

#[cfg(test)]
impl FaultyFileSystemOps {
    /// Create a double with no configured failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `path` fail with `PermissionDenied`.
    #[must_use]
    pub fn fail_writes_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing_writes.push(path.into());
        self
    }

    /// Make every removal of `path` fail with `PermissionDenied`.
    #[must_use]
    pub fn fail_removes_of(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing_removes.push(path.into());
        self
    }

    /// Paths successfully written so far, in order.
    pub fn written(&self) -> Vec<PathBuf> {
        self.writes
            .lock()
            .map_or_else(|_| Vec::new(), |guard| guard.clone())
    }
}

#[cfg(test)]
impl FileSystemOps for FaultyFileSystemOps {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn atomic_write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.failing_writes.iter().any(|p| p == path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected write failure: {}", path.display()),
            ));
        }
        atomic_write(path, contents)?;
        if let Ok(mut guard) = self.writes.lock() {
            guard.push(path.to_path_buf());
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.failing_removes.iter().any(|p| p == path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected remove failure: {}", path.display()),
            ));
        }
        std::fs::remove_file(path)
    }

    fn permissions(&self, path: &Path) -> io::Result<Permissions> {
        std::fs::metadata(path).map(|m| m.permissions())
    }

    fn set_permissions(&self, path: &Path, permissions: Permissions) -> io::Result<()> {
        std::fs::set_permissions(path, permissions)
    }
}
