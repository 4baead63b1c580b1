//! Background persistence for [`CacheStore`](super::CacheStore).
//!
//! Each entry lives in `<dir>/<sha256(key)>.json`. Writes and removals are
//! queued to a single writer thread, so they apply in submission order and
//! never block the caller.

use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::key::hash_hex;

/// On-disk form of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct DiskEntry<V> {
    pub key: String,
    pub value: V,
    pub size_bytes: usize,
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl<V> DiskEntry<V> {
    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.created_at_ms)
    }
}

pub(super) fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Work item for the writer thread.
pub(super) enum DiskJob<V> {
    Write(DiskEntry<V>),
    Remove(String),
    Flush(Sender<()>),
}

/// File holding the entry for `key`.
pub(super) fn entry_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", hash_hex(key.as_bytes())))
}

/// Handle to the writer thread. Dropping the sender ends the thread.
pub(super) struct DiskWriter<V> {
    tx: Option<Sender<DiskJob<V>>>,
    handle: Option<JoinHandle<()>>,
}

impl<V> std::fmt::Debug for DiskWriter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskWriter")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl<V> DiskWriter<V>
where
    V: Serialize + Send + 'static,
{
    pub fn spawn(dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("cache-writer".to_string())
            .spawn(move || run_writer(&dir, &rx))
            .map_err(|e| tracing::warn!("cache persistence disabled: {e}"))
            .ok();
        Self {
            tx: handle.is_some().then_some(tx),
            handle,
        }
    }
}

impl<V> DiskWriter<V> {
    /// Queue a job. Never blocks; jobs submitted after shutdown are dropped.
    pub fn submit(&self, job: DiskJob<V>) {
        if let Some(tx) = &self.tx
            && tx.send(job).is_err()
        {
            tracing::warn!("cache writer thread has exited; dropping persistence job");
        }
    }

    /// Block until every job queued before this call has been applied.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.submit(DiskJob::Flush(ack_tx));
        let _ = ack_rx.recv();
    }

    /// Drain the queue and join the writer thread.
    pub fn shutdown(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("cache writer thread panicked");
        }
    }
}

impl<V> Drop for DiskWriter<V> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer<V: Serialize>(dir: &Path, rx: &Receiver<DiskJob<V>>) {
    for job in rx {
        match job {
            DiskJob::Write(entry) => {
                let path = entry_path(dir, &entry.key);
                match serde_json::to_vec(&entry) {
                    Ok(bytes) => {
                        if let Err(e) = crate::fs::atomic_write(&path, &bytes) {
                            tracing::warn!("failed to persist cache entry {}: {e}", path.display());
                        }
                    }
                    Err(e) => tracing::warn!("failed to serialise cache entry '{}': {e}", entry.key),
                }
            }
            DiskJob::Remove(key) => {
                let path = entry_path(dir, &key);
                if let Err(e) = std::fs::remove_file(&path)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!("failed to remove cache file {}: {e}", path.display());
                }
            }
            DiskJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// Read every persisted entry in `dir`, deleting expired files and skipping
/// corrupt ones. Returned entries are ordered oldest first.
pub(super) fn load_entries<V>(dir: &Path, ttl: Duration) -> Vec<DiskEntry<V>>
where
    V: DeserializeOwned + Send,
{
    let files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("cannot read cache directory {}: {e}", dir.display());
            }
            return Vec::new();
        }
    };

    let now = SystemTime::now();
    let mut entries: Vec<DiskEntry<V>> = files
        .par_iter()
        .filter_map(|path| {
            let entry = std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<DiskEntry<V>>(&bytes).map_err(|e| e.to_string())
                });
            match entry {
                Ok(entry) => {
                    let expired = now
                        .duration_since(entry.created_at())
                        .is_ok_and(|age| age > ttl);
                    if expired {
                        let _ = std::fs::remove_file(path);
                        None
                    } else {
                        Some(entry)
                    }
                }
                Err(reason) => {
                    tracing::warn!("skipping corrupt cache file {}: {reason}", path.display());
                    None
                }
            }
        })
        .collect();
    entries.sort_by_key(|e| e.created_at_ms);
    entries
}
