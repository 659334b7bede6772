//! Response-facing description of filesystem entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::archive::ZIP_MIME;
use crate::error::Result;
use crate::registry::Mount;
use crate::volume::{is_root, join_path, parent_path, Entry};

pub const MIME_DIRECTORY: &str = "directory";
const MIME_UNKNOWN: &str = "application/octet-stream";

/// One file or directory as the client sees it.
///
/// Built fresh from a stat on every call and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub hash: String,
    /// Parent hash, empty for a volume root
    pub phash: String,
    pub mime: String,
    pub ts: i64,
    pub size: u64,
    /// 1 when a directory has at least one subdirectory
    pub dirs: u8,
    pub read: u8,
    pub write: u8,
    pub locked: u8,
    /// `<volume_id>_` for directories, empty for files
    pub volumeid: String,
    pub isroot: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<VolumeOptions>,
}

/// Per-volume options attached to root entries and `open` responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeOptions {
    pub path: String,
    pub separator: String,
    pub disabled: Vec<String>,
    pub copy_overwrite: u8,
    pub upload_overwrite: u8,
    pub archivers: Archivers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archivers {
    pub create: Vec<String>,
    pub extract: Vec<String>,
    pub createext: BTreeMap<String, String>,
}

impl VolumeOptions {
    pub fn for_mount(mount: &Mount) -> Self {
        let mut createext = BTreeMap::new();
        createext.insert(ZIP_MIME.to_string(), "zip".to_string());
        Self {
            path: mount.name().to_string(),
            separator: "/".to_string(),
            disabled: Vec::new(),
            copy_overwrite: 1,
            upload_overwrite: 1,
            archivers: Archivers {
                create: vec![ZIP_MIME.to_string()],
                extract: Vec::new(),
                createext,
            },
        }
    }
}

impl FileInfo {
    /// Build from an already fetched entry.
    pub fn from_entry(mount: &Mount, path: &str, entry: &Entry) -> Self {
        let root = is_root(path);
        let dirs = if entry.is_dir {
            // an unreadable directory simply reports no subdirectories
            mount
                .volume
                .list(path)
                .map(|children| children.iter().any(|c| c.is_dir))
                .unwrap_or(false)
        } else {
            false
        };
        let mime = if entry.is_dir {
            MIME_DIRECTORY.to_string()
        } else {
            mime_guess::from_path(&entry.name)
                .first_raw()
                .unwrap_or(MIME_UNKNOWN)
                .to_string()
        };

        Self {
            name: entry.name.clone(),
            hash: mount.hash(path),
            phash: if root {
                String::new()
            } else {
                mount.hash(&parent_path(path))
            },
            mime,
            ts: entry.modified,
            size: entry.size,
            dirs: dirs as u8,
            read: (entry.mode & 0o400 != 0) as u8,
            write: (entry.mode & 0o200 != 0) as u8,
            locked: root as u8,
            volumeid: if entry.is_dir {
                format!("{}_", mount.id)
            } else {
                String::new()
            },
            isroot: root as u8,
            options: root.then(|| VolumeOptions::for_mount(mount)),
        }
    }

    pub fn stat(mount: &Mount, path: &str) -> Result<Self> {
        let entry = mount.volume.stat(path)?;
        Ok(Self::from_entry(mount, path, &entry))
    }

    pub fn root(mount: &Mount) -> Result<Self> {
        Self::stat(mount, "/")
    }

    pub fn is_dir(&self) -> bool {
        self.mime == MIME_DIRECTORY
    }
}

/// Describe every child of a directory.
pub fn list(mount: &Mount, dir: &str) -> Result<Vec<FileInfo>> {
    let entries = mount.volume.list(dir)?;
    Ok(entries
        .iter()
        .map(|entry| FileInfo::from_entry(mount, &join_path(dir, &entry.name), entry))
        .collect())
}
