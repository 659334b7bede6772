//! Volume contract.
//!
//! A volume is one storage root addressed by absolute, `/`-separated volume
//! paths. Backends are free to store bytes anywhere as long as they honour
//! this trait; [`crate::local::LocalVolume`] is the on-disk implementation.

use std::io::{Read, Write};

use crate::error::{FinderError, Result};

/// Metadata of one entry as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub modified: i64,
    /// Permission bits (`0o777` mask)
    pub mode: u32,
}

/// Capability set over one storage root
pub trait Volume: Send + Sync {
    /// Human-readable name; the volume id is derived from it
    fn name(&self) -> &str;

    fn stat(&self, path: &str) -> Result<Entry>;

    /// Direct children of a directory
    fn list(&self, path: &str) -> Result<Vec<Entry>>;

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Create or truncate a file for writing
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>>;

    /// Write `data` at `offset`, creating the file if absent. Never truncates.
    fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> Result<()>;

    fn make_dir(&self, path: &str) -> Result<()>;

    /// Remove a file or a whole directory tree
    fn remove(&self, path: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }
}

/// Join a directory volume path and a child name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parent of a volume path; the root is its own parent.
pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// Final component of a volume path (empty for the root).
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub fn is_root(path: &str) -> bool {
    path.trim_matches('/').is_empty()
}

/// Validate a single path component supplied by a client.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(FinderError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Lexically normalize a volume path. A `..` above the root is `PathEscape`.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(FinderError::PathEscape(path.to_string()));
                }
            }
            part => parts.push(part),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("").unwrap(), "/");
        assert_eq!(normalize_path("docs/./a.txt").unwrap(), "/docs/a.txt");
        assert_eq!(normalize_path("/x/../d/sub/").unwrap(), "/d/sub");
        assert_eq!(normalize_path("//d//e").unwrap(), "/d/e");
        assert!(matches!(
            normalize_path("/d/../../etc"),
            Err(FinderError::PathEscape(_))
        ));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "docs"), "/docs");
        assert_eq!(join_path("/docs", "a.txt"), "/docs/a.txt");
    }

    #[test]
    fn test_parent_and_base() {
        assert_eq!(parent_path("/docs/a.txt"), "/docs");
        assert_eq!(parent_path("/docs"), "/");
        assert_eq!(parent_path("/"), "/");
        assert_eq!(base_name("/docs/a.txt"), "a.txt");
        assert_eq!(base_name("/docs/"), "docs");
        assert_eq!(base_name("/"), "");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report.pdf").is_ok());
        for bad in ["", ".", "..", "a/b"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
