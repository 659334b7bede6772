//! Local disk volume.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::instrument;

use crate::error::{FinderError, Result};
use crate::volume::{normalize_path, Entry, Volume};

/// A volume rooted at a directory on the local filesystem.
///
/// Volume paths are resolved lexically against the root; any `..` that would
/// climb above the root is rejected with `PathEscape`. Symlinks are followed
/// only while they stay under the root.
#[derive(Debug, Clone)]
pub struct LocalVolume {
    name: String,
    root: PathBuf,
}

impl LocalVolume {
    /// Mount `root` under `name`. The root must be an existing directory.
    pub fn new<P: AsRef<Path>>(name: impl Into<String>, root: P) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|_| FinderError::PathNotFound(root.display().to_string()))?;
        if !root.is_dir() {
            return Err(FinderError::PathNotFound(root.display().to_string()));
        }
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    /// Mount `root` using its directory name as the volume name.
    pub fn from_root<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let name = root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "root".to_string());
        Self::new(name, root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a volume path onto the host filesystem.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_path(path)?;
        let mut resolved = self.root.clone();
        resolved.extend(normalized.split('/').filter(|part| !part.is_empty()));
        Ok(resolved)
    }

    /// Resolve `path` and refuse it when a symlink carries it outside the
    /// root. With `follow` unset the final component itself is not followed,
    /// so a link can still be renamed or removed.
    fn confined(&self, path: &str, follow: bool) -> Result<PathBuf> {
        let host = self.resolve(path)?;
        if host == self.root {
            return Ok(host);
        }
        let start = if follow {
            host.as_path()
        } else {
            host.parent().unwrap_or(self.root.as_path())
        };
        // The deepest existing ancestor decides; missing tails are created inside it
        for ancestor in start.ancestors() {
            if let Ok(real) = ancestor.canonicalize() {
                if !real.starts_with(&self.root) {
                    return Err(FinderError::PathEscape(path.to_string()));
                }
                break;
            }
        }
        Ok(host)
    }

    fn within_root(&self, host: &Path) -> bool {
        host.canonicalize()
            .map(|real| real.starts_with(&self.root))
            .unwrap_or(false)
    }

    fn entry_for(&self, host: &Path, metadata: &fs::Metadata) -> Entry {
        let name = if host == self.root {
            self.name.clone()
        } else {
            host.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Entry {
            name,
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified,
            mode: metadata.permissions().mode() & 0o777,
        }
    }
}

fn not_found_or(path: &str, e: io::Error) -> FinderError {
    match e.kind() {
        io::ErrorKind::NotFound => FinderError::PathNotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => FinderError::AlreadyExists(path.to_string()),
        _ => FinderError::Io(e),
    }
}

impl Volume for LocalVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self, path: &str) -> Result<Entry> {
        let host = self.confined(path, true)?;
        let metadata = fs::metadata(&host).map_err(|e| not_found_or(path, e))?;
        Ok(self.entry_for(&host, &metadata))
    }

    #[instrument(skip(self), level = "debug")]
    fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let host = self.confined(path, true)?;
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&host).map_err(|e| not_found_or(path, e))? {
            let dirent = dirent?;
            let child = dirent.path();
            // Entries that vanish, dangle or link outside the root are skipped
            if !self.within_root(&child) {
                continue;
            }
            if let Ok(metadata) = fs::metadata(&child) {
                entries.push(self.entry_for(&child, &metadata));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let host = self.confined(path, true)?;
        let file = File::open(&host).map_err(|e| not_found_or(path, e))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let host = self.confined(path, true)?;
        let file = File::create(&host).map_err(|e| not_found_or(path, e))?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        let host = self.confined(path, true)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&host)
            .map_err(|e| not_found_or(path, e))?;
        file.write_all_at(data, offset)?;
        file.sync_data()?;
        Ok(())
    }

    fn make_dir(&self, path: &str) -> Result<()> {
        let host = self.confined(path, false)?;
        fs::create_dir(&host).map_err(|e| not_found_or(path, e))
    }

    fn remove(&self, path: &str) -> Result<()> {
        let host = self.confined(path, false)?;
        if host == self.root {
            return Err(FinderError::Locked(path.to_string()));
        }
        let metadata = fs::symlink_metadata(&host).map_err(|e| not_found_or(path, e))?;
        if metadata.is_dir() {
            fs::remove_dir_all(&host)?;
        } else {
            fs::remove_file(&host)?;
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.confined(from, false)?;
        let dst = self.confined(to, false)?;
        if src == self.root {
            return Err(FinderError::Locked(from.to_string()));
        }
        fs::rename(&src, &dst).map_err(|e| not_found_or(from, e))
    }
}
