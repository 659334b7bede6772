//! Volume registry.
//!
//! Built once at startup and read-only afterwards, so lookups take no lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{FinderError, Result};
use crate::target::{self, Target};
use crate::volume::{normalize_path, Volume};

/// Derive the stable id of a volume from its name.
///
/// BLAKE3 of the name, first 8 bytes as hex, prefixed with `v` so that the
/// id starts with a letter and never contains the target separator.
pub fn volume_id(name: &str) -> String {
    let hash = blake3::hash(name.as_bytes());
    format!("v{}", hex::encode(&hash.as_bytes()[..8]))
}

/// A mounted volume together with its id
#[derive(Clone)]
pub struct Mount {
    pub id: String,
    pub volume: Arc<dyn Volume>,
}

impl Mount {
    pub fn new(volume: Arc<dyn Volume>) -> Self {
        Self {
            id: volume_id(volume.name()),
            volume,
        }
    }

    pub fn name(&self) -> &str {
        self.volume.name()
    }

    /// Target string for a path on this volume
    pub fn hash(&self, path: &str) -> String {
        target::encode(&self.id, path)
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("name", &self.volume.name())
            .finish()
    }
}

/// A target resolved against the registry
#[derive(Debug, Clone)]
pub struct Resolved {
    pub mount: Mount,
    pub path: String,
}

#[derive(Default)]
pub struct VolumeRegistry {
    mounts: Vec<Mount>,
    index: HashMap<String, usize>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a volume and return its id.
    ///
    /// Idempotent by name: registering a second volume with an already known
    /// name keeps the first registration and returns the same id.
    pub fn register(&mut self, volume: Arc<dyn Volume>) -> String {
        let mount = Mount::new(volume);
        if self.index.contains_key(&mount.id) {
            debug!(volume = %mount.name(), id = %mount.id, "Volume already registered");
            return mount.id;
        }
        debug!(volume = %mount.name(), id = %mount.id, "Volume registered");
        let id = mount.id.clone();
        self.index.insert(id.clone(), self.mounts.len());
        self.mounts.push(mount);
        id
    }

    pub fn resolve(&self, volume_id: &str) -> Result<&Mount> {
        self.index
            .get(volume_id)
            .map(|&i| &self.mounts[i])
            .ok_or_else(|| FinderError::VolumeNotFound(volume_id.to_string()))
    }

    /// Decode a target and resolve its volume. Malformed targets and unknown
    /// volume ids are errors; there is no fallback to the default volume.
    /// The resolved path is normalized, so `..` never survives past here.
    pub fn resolve_target(&self, target: &str) -> Result<Resolved> {
        let Target { volume_id, path } = target::decode(target)?;
        let mount = self.resolve(&volume_id)?.clone();
        let path = normalize_path(&path)?;
        Ok(Resolved { mount, path })
    }

    /// First registered volume
    pub fn default_mount(&self) -> Option<&Mount> {
        self.mounts.first()
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}
