//! Timestamped file snapshots with retention.
//!
//! Each backup is a directory `<root>/<id>/` holding copies of the backed-up
//! files under `files/`, mirroring their absolute paths, plus a
//! `manifest.json` describing them. Ids are UTC timestamps, so lexical order
//! is creation order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

/// Default number of backups kept.
pub const DEFAULT_RETENTION: usize = 10;

/// Errors raised while creating, reading or restoring backups.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Filesystem failure.
    #[error("IO error in backup at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A manifest could not be read or written.
    #[error("invalid backup manifest {path}: {reason}")]
    Manifest {
        /// Manifest path.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// Some files could not be put back.
    #[error("restore incomplete, {} file(s) not restored: {}", .failures.len(), .failures.join("; "))]
    RestoreIncomplete {
        /// One message per file.
        failures: Vec<String>,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// One file recorded in a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackedUpFile {
    /// Absolute original location.
    pub source: PathBuf,
    /// Copy inside the backup, if the file existed.
    pub backup: Option<PathBuf>,
    /// Whether the file existed when the backup was taken.
    pub existed: bool,
}

/// Description of a backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Directory name under the backup root.
    pub id: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Files covered by this backup.
    pub files: Vec<BackedUpFile>,
}

impl BackupManifest {
    /// Whether `path` is covered by this backup.
    #[must_use]
    pub fn covers(&self, path: &Path) -> bool {
        let absolute = absolute(path);
        self.files.iter().any(|f| f.source == absolute)
    }
}

/// Creates, lists, restores and prunes backups under one root directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
    retention: usize,
}

impl BackupManager {
    /// Manage backups under `root`, keeping at most `retention` (minimum 1).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            root: root.into(),
            retention: retention.max(1),
        }
    }

    /// Backup root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot `paths` into a new backup, then prune old backups.
    ///
    /// Missing files are recorded with `existed: false` so a restore removes
    /// whatever was created there afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be copied or the manifest cannot be
    /// written. A partially written backup directory is removed.
    pub fn create(&self, paths: &[PathBuf]) -> Result<BackupManifest, BackupError> {
        let sources: BTreeSet<PathBuf> = paths.iter().map(|p| absolute(p)).collect();
        let (id, dir) = self.reserve_dir()?;

        let files = sources
            .par_iter()
            .map(|source| copy_in(source, &dir))
            .collect::<Result<Vec<_>, _>>();
        let files = match files {
            Ok(files) => files,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(e);
            }
        };

        let manifest = BackupManifest {
            id,
            created_at: chrono::Utc::now().to_rfc3339(),
            files,
        };
        if let Err(e) = write_manifest(&dir, &manifest) {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e);
        }
        tracing::debug!(
            "backup {} created with {} file(s)",
            manifest.id,
            manifest.files.len()
        );

        if let Err(e) = self.prune() {
            tracing::warn!("failed to prune old backups: {e}");
        }
        Ok(manifest)
    }

    /// Create a fresh, uniquely named backup directory.
    fn reserve_dir(&self) -> Result<(String, PathBuf), BackupError> {
        std::fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        for attempt in 0..=1000u32 {
            let id = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}-{attempt}")
            };
            let dir = self.root.join(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(io_error(&dir)(e)),
            }
        }
        Err(BackupError::Io {
            path: self.root.display().to_string(),
            source: io::Error::other("no free backup id"),
        })
    }

    /// Put every file in `manifest` back as it was.
    ///
    /// Files that did not exist at backup time are removed.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::RestoreIncomplete`] listing every file that
    /// could not be restored; the others are restored regardless.
    pub fn restore(&self, manifest: &BackupManifest) -> Result<(), BackupError> {
        let failures: Vec<String> = manifest
            .files
            .par_iter()
            .filter_map(|file| restore_one(file).err())
            .collect();
        if failures.is_empty() {
            tracing::debug!("backup {} restored", manifest.id);
            Ok(())
        } else {
            Err(BackupError::RestoreIncomplete { failures })
        }
    }

    /// Every backup under the root, oldest first.
    ///
    /// Directories without a readable manifest are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists but cannot be read.
    pub fn list(&self) -> Result<Vec<BackupManifest>, BackupError> {
        let read_dir = match std::fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root)(e)),
        };
        let mut manifests: Vec<BackupManifest> = read_dir
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| match read_manifest(&e.path()) {
                Ok(manifest) => Some(manifest),
                Err(err) => {
                    tracing::warn!("ignoring backup {}: {err}", e.path().display());
                    None
                }
            })
            .collect();
        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(manifests)
    }

    /// Delete the oldest backups beyond the retention limit.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or deletion fails.
    pub fn prune(&self) -> Result<usize, BackupError> {
        let manifests = self.list()?;
        let excess = manifests.len().saturating_sub(self.retention);
        for manifest in manifests.iter().take(excess) {
            let dir = self.root.join(&manifest.id);
            std::fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
            tracing::debug!("pruned backup {}", manifest.id);
        }
        Ok(excess)
    }
}

/// Absolute form of `path`, resolving symlinks when the file exists.
fn absolute(path: &Path) -> PathBuf {
    dunce::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Location of `source` inside a backup directory.
fn mirrored(dir: &Path, source: &Path) -> PathBuf {
    let mut out = dir.join(FILES_DIR);
    for component in source.components() {
        match component {
            Component::Prefix(prefix) => {
                let drive: String = prefix
                    .as_os_str()
                    .to_string_lossy()
                    .chars()
                    .filter(char::is_ascii_alphanumeric)
                    .collect();
                out.push(drive);
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir | Component::ParentDir => {}
        }
    }
    out
}

fn copy_in(source: &Path, dir: &Path) -> Result<BackedUpFile, BackupError> {
    if !source.is_file() {
        return Ok(BackedUpFile {
            source: source.to_path_buf(),
            backup: None,
            existed: false,
        });
    }
    let backup = mirrored(dir, source);
    if let Some(parent) = backup.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    std::fs::copy(source, &backup).map_err(io_error(source))?;
    Ok(BackedUpFile {
        source: source.to_path_buf(),
        backup: Some(backup),
        existed: true,
    })
}

fn restore_one(file: &BackedUpFile) -> Result<(), String> {
    match (&file.backup, file.existed) {
        (Some(backup), true) => std::fs::read(backup)
            .and_then(|bytes| crate::fs::atomic_write(&file.source, &bytes))
            .and_then(|()| std::fs::metadata(backup))
            .and_then(|meta| std::fs::set_permissions(&file.source, meta.permissions()))
            .map_err(|e| format!("{}: {e}", file.source.display())),
        _ => match std::fs::remove_file(&file.source) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("{}: {e}", file.source.display())),
        },
    }
}

fn write_manifest(dir: &Path, manifest: &BackupManifest) -> Result<(), BackupError> {
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(manifest).map_err(|e| BackupError::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    crate::fs::atomic_write(&path, &json).map_err(io_error(&path))
}

fn read_manifest(dir: &Path) -> Result<BackupManifest, BackupError> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = std::fs::read(&path).map_err(io_error(&path))?;
    serde_json::from_slice(&bytes).map_err(|e| BackupError::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
