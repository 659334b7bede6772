//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Isolated volume roots
//! - A private staging directory for archives
//!
//! # Usage
//!
//! ```ignore
//! use vfind_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::with_volumes(&["files", "media"]).unwrap();
//!     env.create_file("files", "docs/a.txt", b"hello").unwrap();
//!     let config = env.config();
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, VolumeConfig};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment; everything lives under one temp dir
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Mounted volume roots, in registration order
    pub volumes: Vec<VolumeConfig>,
    /// Archive staging directory
    pub tmp_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Single volume named `files`
    pub fn new() -> anyhow::Result<Self> {
        Self::with_volumes(&["files"])
    }

    pub fn with_volumes(names: &[&str]) -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let mut volumes = Vec::with_capacity(names.len());
        for name in names {
            let path = root.join("volumes").join(name);
            std::fs::create_dir_all(&path)?;
            volumes.push(VolumeConfig {
                name: name.to_string(),
                path,
            });
        }

        let tmp_dir = root.join("tmp");
        std::fs::create_dir_all(&tmp_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            volumes,
            tmp_dir,
            test_id,
        })
    }

    /// Host path of a volume root
    pub fn volume_root(&self, name: &str) -> anyhow::Result<PathBuf> {
        self.volumes
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.path.clone())
            .ok_or_else(|| anyhow::anyhow!("no volume named {}", name))
    }

    /// Create a test file with content inside a volume
    pub fn create_file(
        &self,
        volume: &str,
        relative_path: &str,
        content: &[u8],
    ) -> anyhow::Result<PathBuf> {
        let path = self.volume_root(volume)?.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a test directory inside a volume
    pub fn create_dir(&self, volume: &str, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.volume_root(volume)?.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Files currently staged in the archive directory
    pub fn staged_archives(&self) -> anyhow::Result<usize> {
        Ok(std::fs::read_dir(&self.tmp_dir)?.count())
    }

    /// Config pointing at this environment's volumes and staging dir
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.volumes = self.volumes.clone();
        cfg.archive.tmp_dir = Some(self.tmp_dir.clone());
        cfg
    }
}
