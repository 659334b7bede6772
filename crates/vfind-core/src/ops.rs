//! Single-shot file operations.
//!
//! Each operation is a direct translation of one command into a few volume
//! calls and returns fresh [`FileInfo`] values for the response.

use std::io::{self, Read, Write};

use tracing::{debug, instrument, warn};

use crate::error::{FinderError, Result};
use crate::info::{self, FileInfo};
use crate::registry::Mount;
use crate::volume::{base_name, is_root, join_path, normalize_path, parent_path, validate_name};

/// Default suffix appended to pasted names that already exist
pub const DEFAULT_PASTE_SUFFIX: &str = "~";

pub fn make_dir(mount: &Mount, dir: &str, name: &str) -> Result<FileInfo> {
    validate_name(name)?;
    let path = join_path(dir, name);
    mount.volume.make_dir(&path)?;
    debug!(volume = %mount.name(), path = %path, "Directory created");
    FileInfo::stat(mount, &path)
}

pub fn make_file(mount: &Mount, dir: &str, name: &str) -> Result<FileInfo> {
    validate_name(name)?;
    let path = join_path(dir, name);
    if mount.volume.exists(&path) {
        return Err(FinderError::AlreadyExists(path));
    }
    mount.volume.create(&path)?.flush()?;
    FileInfo::stat(mount, &path)
}

pub fn rename(mount: &Mount, path: &str, new_name: &str) -> Result<FileInfo> {
    validate_name(new_name)?;
    if is_root(path) {
        return Err(FinderError::Locked(path.to_string()));
    }
    let dest = join_path(&parent_path(path), new_name);
    if mount.volume.exists(&dest) {
        return Err(FinderError::AlreadyExists(dest));
    }
    mount.volume.rename(path, &dest)?;
    FileInfo::stat(mount, &dest)
}

pub fn remove(mount: &Mount, path: &str) -> Result<()> {
    if is_root(path) {
        return Err(FinderError::Locked(path.to_string()));
    }
    mount.volume.remove(path)
}

/// Store an uploaded file in `dir`, replacing an existing file of that name.
pub fn upload_file(mount: &Mount, dir: &str, name: &str, reader: &mut dyn Read) -> Result<FileInfo> {
    validate_name(name)?;
    let path = join_path(dir, name);
    let mut writer = mount.volume.create(&path)?;
    io::copy(reader, &mut writer)?;
    writer.flush()?;
    FileInfo::stat(mount, &path)
}

/// Recursive byte total of a file or directory tree.
///
/// Directories are walked depth-first through `list`; the size a backend
/// reports for a directory itself is never counted.
pub fn total_size(mount: &Mount, path: &str) -> Result<u64> {
    let entry = mount.volume.stat(path)?;
    if !entry.is_dir {
        return Ok(entry.size);
    }
    let mut total = 0u64;
    for child in mount.volume.list(path)? {
        let child_path = join_path(path, &child.name);
        total += if child.is_dir {
            total_size(mount, &child_path)?
        } else {
            child.size
        };
    }
    Ok(total)
}

/// Subdirectories of `path`.
pub fn subdirs(mount: &Mount, path: &str) -> Result<Vec<FileInfo>> {
    Ok(info::list(mount, path)?
        .into_iter()
        .filter(FileInfo::is_dir)
        .collect())
}

/// Every ancestor of `path` from the root down, each followed by its
/// subdirectories. Entries appear once.
pub fn parents(mount: &Mount, path: &str) -> Result<Vec<FileInfo>> {
    let mut chain = vec![path.to_string()];
    let mut current = path.to_string();
    while !is_root(&current) {
        current = parent_path(&current);
        chain.push(current.clone());
    }
    chain.reverse();

    let mut tree: Vec<FileInfo> = Vec::new();
    for dir in &chain {
        let mut batch = vec![FileInfo::stat(mount, dir)?];
        batch.extend(subdirs(mount, dir)?);
        for item in batch {
            if !tree.iter().any(|seen| seen.hash == item.hash) {
                tree.push(item);
            }
        }
    }
    Ok(tree)
}

/// Case-insensitive name search below `path`.
///
/// `mimes` filters by prefix (`image` matches `image/png`); empty means all.
#[instrument(skip(mount, mimes), fields(volume = %mount.name()), level = "debug")]
pub fn search(mount: &Mount, path: &str, query: &str, mimes: &[String]) -> Result<Vec<FileInfo>> {
    let needle = query.to_lowercase();
    let mut found = Vec::new();
    search_into(mount, path, &needle, mimes, &mut found)?;
    Ok(found)
}

fn search_into(
    mount: &Mount,
    dir: &str,
    needle: &str,
    mimes: &[String],
    found: &mut Vec<FileInfo>,
) -> Result<()> {
    for item in info::list(mount, dir)? {
        let child = join_path(dir, &item.name);
        let is_dir = item.is_dir();
        let mime_ok = mimes.is_empty() || mimes.iter().any(|m| item.mime.starts_with(m.as_str()));
        if mime_ok && item.name.to_lowercase().contains(needle) {
            found.push(item);
        }
        if is_dir {
            search_into(mount, &child, needle, mimes, found)?;
        }
    }
    Ok(())
}

/// First free name in `dir`, appending `suffix` until nothing collides.
fn free_name(mount: &Mount, dir: &str, name: &str, suffix: &str) -> String {
    let mut candidate = name.to_string();
    while mount.volume.exists(&join_path(dir, &candidate)) {
        if suffix.is_empty() {
            candidate.push_str(DEFAULT_PASTE_SUFFIX);
        } else {
            candidate.push_str(suffix);
        }
    }
    candidate
}

fn is_within(path: &str, ancestor: &str) -> bool {
    is_root(ancestor) || path == ancestor || path.starts_with(&format!("{}/", ancestor))
}

/// Copy a file or directory tree into `dst_dir`, possibly across volumes.
///
/// Returns the created entries, top-level first.
pub fn copy_into(
    src: &Mount,
    src_path: &str,
    dst: &Mount,
    dst_dir: &str,
    suffix: &str,
) -> Result<Vec<FileInfo>> {
    let src_path = &normalize_path(src_path)?;
    let dst_dir = &normalize_path(dst_dir)?;
    if is_root(src_path) {
        return Err(FinderError::Locked(src_path.to_string()));
    }
    if src.id == dst.id && is_within(dst_dir, src_path) {
        return Err(FinderError::InvalidName(format!(
            "cannot copy {} into itself",
            src_path
        )));
    }
    let name = free_name(dst, dst_dir, base_name(src_path), suffix);
    let dst_path = join_path(dst_dir, &name);
    let mut added = Vec::new();
    copy_tree(src, src_path, dst, &dst_path, &mut added)?;
    Ok(added)
}

fn copy_tree(
    src: &Mount,
    src_path: &str,
    dst: &Mount,
    dst_path: &str,
    added: &mut Vec<FileInfo>,
) -> Result<()> {
    let entry = src.volume.stat(src_path)?;
    if entry.is_dir {
        // listed before the copy exists, so a copy nested in its source is never revisited
        let children = src.volume.list(src_path)?;
        dst.volume.make_dir(dst_path)?;
        added.push(FileInfo::stat(dst, dst_path)?);
        for child in children {
            copy_tree(
                src,
                &join_path(src_path, &child.name),
                dst,
                &join_path(dst_path, &child.name),
                added,
            )?;
        }
    } else {
        let mut reader = src.volume.open(src_path)?;
        let mut writer = dst.volume.create(dst_path)?;
        io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        added.push(FileInfo::stat(dst, dst_path)?);
    }
    Ok(())
}

/// Move a file or directory tree into `dst_dir`.
///
/// Same-volume moves are a rename; cross-volume moves copy then remove the
/// source. A failed source removal is reported after the copy succeeded.
pub fn move_into(
    src: &Mount,
    src_path: &str,
    dst: &Mount,
    dst_dir: &str,
    suffix: &str,
) -> Result<Vec<FileInfo>> {
    let src_path = &normalize_path(src_path)?;
    let dst_dir = &normalize_path(dst_dir)?;
    if src.id != dst.id {
        let added = copy_into(src, src_path, dst, dst_dir, suffix)?;
        if let Err(e) = src.volume.remove(src_path) {
            warn!(path = %src_path, error = %e, "Copied but failed to remove source");
            return Err(e);
        }
        return Ok(added);
    }

    if is_root(src_path) {
        return Err(FinderError::Locked(src_path.to_string()));
    }
    if is_within(dst_dir, src_path) {
        return Err(FinderError::InvalidName(format!(
            "cannot move {} into itself",
            src_path
        )));
    }
    let name = free_name(dst, dst_dir, base_name(src_path), suffix);
    let dst_path = join_path(dst_dir, &name);
    src.volume.rename(src_path, &dst_path)?;
    Ok(vec![FileInfo::stat(dst, &dst_path)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalVolume;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn mount(name: &str, temp: &TempDir) -> Mount {
        Mount::new(Arc::new(LocalVolume::new(name, temp.path()).unwrap()))
    }

    #[test]
    fn test_mkdir_then_mkfile_scenario() {
        let temp = TempDir::new().unwrap();
        let vol = mount("v1", &temp);

        let docs = make_dir(&vol, "/", "docs").unwrap();
        assert!(docs.is_dir());
        assert_eq!(docs.dirs, 0);
        assert_eq!(docs.hash, vol.hash("/docs"));

        let mut data: &[u8] = b"0123456789";
        let file = upload_file(&vol, "/docs", "a.txt", &mut data).unwrap();
        assert_eq!(file.size, 10);

        let listing = info::list(&vol, "/docs").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "a.txt");
        assert_eq!(listing[0].size, 10);
    }

    #[test]
    fn test_mkfile_refuses_existing() {
        let temp = TempDir::new().unwrap();
        let vol = mount("v1", &temp);
        make_file(&vol, "/", "a.txt").unwrap();
        assert!(matches!(
            make_file(&vol, "/", "a.txt"),
            Err(FinderError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_rename() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("old.txt"), b"x").unwrap();
        fs::write(temp.path().join("taken.txt"), b"y").unwrap();
        let vol = mount("v1", &temp);

        let renamed = rename(&vol, "/old.txt", "new.txt").unwrap();
        assert_eq!(renamed.name, "new.txt");
        assert!(temp.path().join("new.txt").exists());

        assert!(matches!(
            rename(&vol, "/new.txt", "taken.txt"),
            Err(FinderError::AlreadyExists(_))
        ));
        assert!(matches!(
            rename(&vol, "/new.txt", "../escape"),
            Err(FinderError::InvalidName(_))
        ));
        assert!(matches!(rename(&vol, "/", "x"), Err(FinderError::Locked(_))));
    }

    #[test]
    fn test_total_size_ignores_directory_sizes() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("d/e")).unwrap();
        fs::write(temp.path().join("d/a"), vec![0u8; 100]).unwrap();
        fs::write(temp.path().join("d/e/b"), vec![0u8; 23]).unwrap();
        let vol = mount("v1", &temp);
        assert_eq!(total_size(&vol, "/d").unwrap(), 123);
        assert_eq!(total_size(&vol, "/d/a").unwrap(), 100);
    }

    #[test]
    fn test_parents_chain() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b/c")).unwrap();
        fs::create_dir_all(temp.path().join("a/sibling")).unwrap();
        let vol = mount("v1", &temp);

        let tree = parents(&vol, "/a/b").unwrap();
        let hashes: Vec<_> = tree.iter().map(|i| i.hash.clone()).collect();
        assert_eq!(hashes[0], vol.hash("/"));
        assert!(hashes.contains(&vol.hash("/a")));
        assert!(hashes.contains(&vol.hash("/a/sibling")));
        assert!(hashes.contains(&vol.hash("/a/b/c")));
        let mut unique = hashes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), hashes.len());
    }

    #[test]
    fn test_search_matches_names_case_insensitively() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("photos")).unwrap();
        fs::write(temp.path().join("photos/Holiday.PNG"), b"x").unwrap();
        fs::write(temp.path().join("holiday-notes.txt"), b"x").unwrap();
        let vol = mount("v1", &temp);

        let all = search(&vol, "/", "holiday", &[]).unwrap();
        assert_eq!(all.len(), 2);

        let images = search(&vol, "/", "holiday", &["image".to_string()]).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "Holiday.PNG");
    }

    #[test]
    fn test_copy_across_volumes_with_suffix() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::create_dir_all(a.path().join("docs/inner")).unwrap();
        fs::write(a.path().join("docs/inner/f.txt"), b"hello").unwrap();
        fs::create_dir(b.path().join("docs")).unwrap();
        let src = mount("a", &a);
        let dst = mount("b", &b);

        let added = copy_into(&src, "/docs", &dst, "/", "").unwrap();
        assert_eq!(added[0].name, "docs~");
        assert_eq!(added.len(), 3);
        assert_eq!(
            fs::read(b.path().join("docs~/inner/f.txt")).unwrap(),
            b"hello"
        );
        assert!(a.path().join("docs/inner/f.txt").exists());
    }

    #[test]
    fn test_copy_into_itself_rejected() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("d/sub")).unwrap();
        let vol = mount("v1", &temp);
        assert!(copy_into(&vol, "/d", &vol, "/d/sub", "").is_err());
    }

    #[test]
    fn test_copy_into_itself_through_dot_dot_rejected() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("d/sub")).unwrap();
        fs::create_dir(temp.path().join("x")).unwrap();
        let vol = mount("v1", &temp);

        assert!(matches!(
            copy_into(&vol, "/d", &vol, "/x/../d/sub", ""),
            Err(FinderError::InvalidName(_))
        ));
        assert!(matches!(
            copy_into(&vol, "/x/../d", &vol, "/d/./sub", ""),
            Err(FinderError::InvalidName(_))
        ));
        assert!(matches!(
            move_into(&vol, "/d", &vol, "/x/../d/sub", ""),
            Err(FinderError::InvalidName(_))
        ));
        assert!(!temp.path().join("d/sub/d").exists());
    }

    #[test]
    fn test_copy_through_alias_copies_source_once() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("real")).unwrap();
        fs::write(temp.path().join("real/a.txt"), b"a").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("alias")).unwrap();
        let vol = mount("v1", &temp);

        let added = copy_into(&vol, "/real", &vol, "/alias", "").unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(fs::read(temp.path().join("real/real/a.txt")).unwrap(), b"a");
        assert!(!temp.path().join("real/real/real").exists());
    }

    #[test]
    fn test_move_within_and_across() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::create_dir(a.path().join("target")).unwrap();
        fs::write(a.path().join("f.txt"), b"1").unwrap();
        fs::write(a.path().join("g.txt"), b"2").unwrap();
        let src = mount("a", &a);
        let dst = mount("b", &b);

        let moved = move_into(&src, "/f.txt", &src, "/target", "").unwrap();
        assert_eq!(moved[0].hash, src.hash("/target/f.txt"));
        assert!(!a.path().join("f.txt").exists());

        move_into(&src, "/g.txt", &dst, "/", "").unwrap();
        assert!(!a.path().join("g.txt").exists());
        assert_eq!(fs::read(b.path().join("g.txt")).unwrap(), b"2");
    }
}
