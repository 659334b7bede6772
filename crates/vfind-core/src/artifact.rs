//! One-shot registry of temporary download artifacts.
//!
//! An artifact is a file on local disk bound to an opaque key. The key can
//! be taken exactly once: taking it removes the binding, opens the file and
//! unlinks it, so the caller streams from a handle that no longer has a name.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{FinderError, Result};

#[derive(Debug)]
struct ArtifactEntry {
    path: PathBuf,
    created: Instant,
}

/// A consumed artifact, already removed from disk
#[derive(Debug)]
pub struct TakenArtifact {
    pub file: File,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    entries: Mutex<HashMap<String, ArtifactEntry>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ArtifactEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `key` to `path`. A previous artifact under the same key is
    /// discarded.
    pub fn put(&self, key: impl Into<String>, path: impl Into<PathBuf>) {
        let key = key.into();
        let entry = ArtifactEntry {
            path: path.into(),
            created: Instant::now(),
        };
        debug!(key = %key, path = %entry.path.display(), "Artifact registered");
        if let Some(old) = self.lock().insert(key, entry) {
            delete_file(&old.path);
        }
    }

    /// Atomically remove the binding and hand out the file.
    pub fn take(&self, key: &str) -> Result<TakenArtifact> {
        let entry = self
            .lock()
            .remove(key)
            .ok_or_else(|| FinderError::ArtifactNotFound(key.to_string()))?;

        let opened = File::open(&entry.path);
        // the binding is gone, so the name goes too whatever happens next
        delete_file(&entry.path);
        let file = match opened {
            Ok(file) => file,
            Err(e) => {
                warn!(key = %key, error = %e, "Artifact file vanished");
                return Err(FinderError::ArtifactNotFound(key.to_string()));
            }
        };
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            warn!(key = %key, path = %entry.path.display(), "Artifact is not a regular file");
            return Err(FinderError::ArtifactNotFound(key.to_string()));
        }
        debug!(key = %key, size = metadata.len(), "Artifact taken");
        Ok(TakenArtifact {
            file,
            size: metadata.len(),
        })
    }

    /// Drop a binding and delete its file. Returns whether the key existed.
    pub fn discard(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(entry) => {
                delete_file(&entry.path);
                true
            }
            None => false,
        }
    }

    /// Discard every artifact older than `max_age`.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let expired: Vec<ArtifactEntry> = {
            let mut entries = self.lock();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.created.elapsed() >= max_age)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        for entry in &expired {
            delete_file(&entry.path);
        }
        expired.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Drop for ArtifactRegistry {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in entries.drain() {
            delete_file(&entry.path);
        }
    }
}

fn delete_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete artifact file");
        }
    }
}
