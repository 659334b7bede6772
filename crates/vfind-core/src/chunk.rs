//! Chunked upload reassembly.
//!
//! A transfer is identified by a client-chosen numeric id (`cid`) and the
//! target filename. Every chunk lands in its own part file next to the
//! destination:
//!
//! ```text
//! <dir>/<filename>.<index>_<total>.part_<cid>
//! ```
//!
//! The part name depends only on the chunk's declared index, so chunks may
//! arrive in any order and re-delivering a chunk rewrites the same bytes.
//! Merging is an explicit step: it concatenates parts `0..total` into a
//! staging file, renames it into place and only then deletes the parts.
//! Merges for the same transfer are serialized.

use std::io::{self, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::error::{FinderError, Result};
use crate::info::FileInfo;
use crate::registry::Mount;
use crate::volume::{join_path, validate_name};

const PART_SUFFIX: &str = ".part";

/// Parsed chunk field: `<name>.<index>_<total>.part`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkName {
    pub filename: String,
    pub index: u32,
    pub total: u32,
}

impl ChunkName {
    /// Whether this is the final part, after which a merge may be requested
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

impl FromStr for ChunkName {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FinderError::InvalidChunk(s.to_string());
        let stem = s.strip_suffix(PART_SUFFIX).ok_or_else(invalid)?;
        let (filename, counter) = stem.rsplit_once('.').ok_or_else(invalid)?;
        let (index, total) = counter.split_once('_').ok_or_else(invalid)?;
        let index: u32 = index.parse().map_err(|_| invalid())?;
        let total: u32 = total.parse().map_err(|_| invalid())?;
        if total == 0 || index >= total {
            return Err(invalid());
        }
        validate_name(filename).map_err(|_| invalid())?;
        Ok(Self {
            filename: filename.to_string(),
            index,
            total,
        })
    }
}

/// Byte range descriptor sent with a chunk: `offset,length,totalSize`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub offset: u64,
    pub length: u64,
    pub total_size: u64,
}

impl FromStr for ChunkRange {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FinderError::InvalidChunk(format!("range {}", s));
        let fields: Vec<u64> = s
            .split(',')
            .map(|f| f.trim().parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| invalid())?;
        let [offset, length, total_size] = fields[..] else {
            return Err(invalid());
        };
        if offset.checked_add(length).map_or(true, |end| end > total_size) {
            return Err(invalid());
        }
        Ok(Self {
            offset,
            length,
            total_size,
        })
    }
}

/// Merge trigger: `<cid>_<total>_<filename>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub cid: u64,
    pub total: u32,
    pub filename: String,
}

impl MergeRequest {
    pub fn new(cid: u64, total: u32, filename: impl Into<String>) -> Self {
        Self {
            cid,
            total,
            filename: filename.into(),
        }
    }

    /// Wire form, as returned to the client after the last chunk
    pub fn token(&self) -> String {
        format!("{}_{}_{}", self.cid, self.total, self.filename)
    }
}

impl FromStr for MergeRequest {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FinderError::InvalidChunk(s.to_string());
        let mut fields = s.splitn(3, '_');
        let cid = fields.next().and_then(|f| f.parse().ok()).ok_or_else(invalid)?;
        let total: u32 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(invalid)?;
        let filename = fields.next().ok_or_else(invalid)?;
        if total == 0 {
            return Err(invalid());
        }
        validate_name(filename).map_err(|_| invalid())?;
        Ok(Self::new(cid, total, filename))
    }
}

/// Name of the part file for `index` of a transfer.
pub fn part_name(filename: &str, index: u32, total: u32, cid: u64) -> String {
    format!("{}.{}_{}{}_{}", filename, index, total, PART_SUFFIX, cid)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransferKey {
    volume_id: String,
    dir: String,
    cid: u64,
    filename: String,
}

/// Reassembles chunked uploads on top of any volume
#[derive(Default)]
pub struct ChunkReassembler {
    merging: DashMap<TransferKey, Arc<Mutex<()>>>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist one chunk.
    ///
    /// `upload_dir` overrides `dir` as the destination directory when set.
    /// The chunk is written at position 0 of its own part file; `range`
    /// must describe exactly `data`.
    #[instrument(
        skip(self, mount, data),
        fields(volume = %mount.name(), file = %chunk.filename, index = chunk.index),
        level = "debug"
    )]
    pub fn write_chunk(
        &self,
        mount: &Mount,
        dir: &str,
        upload_dir: Option<&str>,
        cid: u64,
        chunk: &ChunkName,
        range: &ChunkRange,
        data: &[u8],
    ) -> Result<()> {
        if data.len() as u64 != range.length {
            return Err(FinderError::InvalidChunk(format!(
                "{}: range declares {} bytes, got {}",
                chunk.filename,
                range.length,
                data.len()
            )));
        }
        let dir = upload_dir.unwrap_or(dir);
        let part = join_path(dir, &part_name(&chunk.filename, chunk.index, chunk.total, cid));
        mount
            .volume
            .write_at(&part, 0, data)
            .map_err(|e| match e {
                FinderError::Io(io) => FinderError::ChunkWriteFailed {
                    part: part.clone(),
                    reason: io.to_string(),
                },
                other => other,
            })?;
        debug!(part = %part, offset = range.offset, len = range.length, "Chunk stored");
        Ok(())
    }

    /// First missing part index, if any. Checks existence only.
    pub fn missing_part(
        &self,
        mount: &Mount,
        dir: &str,
        cid: u64,
        total: u32,
        filename: &str,
    ) -> Option<u32> {
        (0..total).find(|&i| {
            !mount
                .volume
                .exists(&join_path(dir, &part_name(filename, i, total, cid)))
        })
    }

    pub fn all_parts_present(
        &self,
        mount: &Mount,
        dir: &str,
        cid: u64,
        total: u32,
        filename: &str,
    ) -> bool {
        self.missing_part(mount, dir, cid, total, filename).is_none()
    }

    /// Concatenate all parts into the final file.
    ///
    /// A missing part yields `IncompleteTransfer` and leaves every part in
    /// place. Parts are deleted only after the merged file is in place.
    #[instrument(
        skip(self, mount),
        fields(volume = %mount.name(), file = %request.filename, cid = request.cid),
        level = "debug"
    )]
    pub fn merge(
        &self,
        mount: &Mount,
        dir: &str,
        upload_dir: Option<&str>,
        request: &MergeRequest,
    ) -> Result<FileInfo> {
        let dir = upload_dir.unwrap_or(dir);
        let key = TransferKey {
            volume_id: mount.id.clone(),
            dir: dir.to_string(),
            cid: request.cid,
            filename: request.filename.clone(),
        };
        let lock = self.merging.entry(key.clone()).or_default().clone();

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.merge_locked(mount, dir, request)
        };

        drop(lock);
        self.merging
            .remove_if(&key, |_, held| Arc::strong_count(held) == 1);
        result
    }

    fn merge_locked(&self, mount: &Mount, dir: &str, request: &MergeRequest) -> Result<FileInfo> {
        let MergeRequest {
            cid,
            total,
            ref filename,
        } = *request;

        if let Some(missing) = self.missing_part(mount, dir, cid, total, filename) {
            return Err(FinderError::IncompleteTransfer {
                filename: filename.clone(),
                missing,
                total,
            });
        }

        let staging = join_path(dir, &format!(".{}.merging_{}", filename, cid));
        if let Err(e) = self.concat_parts(mount, dir, request, &staging) {
            let _ = mount.volume.remove(&staging);
            return Err(e);
        }

        let dest = join_path(dir, filename);
        if let Err(e) = mount.volume.rename(&staging, &dest) {
            let _ = mount.volume.remove(&staging);
            return Err(e);
        }

        for i in 0..total {
            let part = join_path(dir, &part_name(filename, i, total, cid));
            if let Err(e) = mount.volume.remove(&part) {
                warn!(part = %part, error = %e, "Failed to delete merged part");
            }
        }

        info!(volume = %mount.name(), path = %dest, parts = total, "Chunked upload merged");
        FileInfo::stat(mount, &dest)
    }

    fn concat_parts(
        &self,
        mount: &Mount,
        dir: &str,
        request: &MergeRequest,
        staging: &str,
    ) -> Result<()> {
        let mut out = mount.volume.create(staging)?;
        for i in 0..request.total {
            let part = join_path(
                dir,
                &part_name(&request.filename, i, request.total, request.cid),
            );
            let mut reader = mount.volume.open(&part).map_err(|e| match e {
                FinderError::PathNotFound(_) => FinderError::IncompleteTransfer {
                    filename: request.filename.clone(),
                    missing: i,
                    total: request.total,
                },
                other => other,
            })?;
            io::copy(&mut reader, &mut out)?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalVolume;
    use crate::volume::testing::FailingVolume;
    use std::fs;
    use tempfile::TempDir;

    fn mount(temp: &TempDir) -> Mount {
        Mount::new(Arc::new(LocalVolume::new("uploads", temp.path()).unwrap()))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn part_files(temp: &TempDir) -> Vec<String> {
        fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".part_"))
            .collect()
    }

    fn send(
        r: &ChunkReassembler,
        m: &Mount,
        data: &[u8],
        index: u32,
        total: u32,
        chunk_len: usize,
    ) {
        let start = index as usize * chunk_len;
        let end = (start + chunk_len).min(data.len());
        let chunk: ChunkName = format!("big.bin.{}_{}.part", index, total).parse().unwrap();
        let range: ChunkRange = format!("{},{},{}", start, end - start, data.len())
            .parse()
            .unwrap();
        r.write_chunk(m, "/", None, 42, &chunk, &range, &data[start..end])
            .unwrap();
    }

    #[test]
    fn test_chunk_name_grammar() {
        let chunk: ChunkName = "big.bin.2_3.part".parse().unwrap();
        assert_eq!(chunk.filename, "big.bin");
        assert_eq!((chunk.index, chunk.total), (2, 3));
        assert!(chunk.is_last());

        let first: ChunkName = "archive.tar.gz.0_10.part".parse().unwrap();
        assert_eq!(first.filename, "archive.tar.gz");
        assert!(!first.is_last());

        for bad in ["big.bin", "big.bin.x_3.part", "big.bin.3_3.part", ".0_1.part", "big.bin.0_0.part"] {
            assert!(bad.parse::<ChunkName>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_range_grammar() {
        let range: ChunkRange = "100,100,300".parse().unwrap();
        assert_eq!(range.offset, 100);
        assert_eq!(range.length, 100);
        assert_eq!(range.total_size, 300);
        assert!("1,2".parse::<ChunkRange>().is_err());
        assert!("250,100,300".parse::<ChunkRange>().is_err());
        assert!("a,b,c".parse::<ChunkRange>().is_err());
    }

    #[test]
    fn test_merge_token_grammar() {
        let req: MergeRequest = "42_3_my_file.bin".parse().unwrap();
        assert_eq!(req, MergeRequest::new(42, 3, "my_file.bin"));
        assert_eq!(req.token(), "42_3_my_file.bin");
        assert!("x_3_f".parse::<MergeRequest>().is_err());
        assert!("1_0_f".parse::<MergeRequest>().is_err());
    }

    #[test]
    fn test_three_chunks_scenario() {
        let temp = TempDir::new().unwrap();
        let m = mount(&temp);
        let r = ChunkReassembler::new();
        let data = payload(300);

        for i in 0..3 {
            send(&r, &m, &data, i, 3, 100);
        }
        assert!(r.all_parts_present(&m, "/", 42, 3, "big.bin"));

        let info = r
            .merge(&m, "/", None, &MergeRequest::new(42, 3, "big.bin"))
            .unwrap();
        assert_eq!(info.name, "big.bin");
        assert_eq!(info.size, 300);
        assert_eq!(fs::read(temp.path().join("big.bin")).unwrap(), data);
        assert!(part_files(&temp).is_empty());
    }

    #[test]
    fn test_out_of_order_and_retried_chunks() {
        let temp = TempDir::new().unwrap();
        let m = mount(&temp);
        let r = ChunkReassembler::new();
        let data = payload(1000);

        for i in [3, 0, 9, 1, 4, 4, 8, 2, 7, 5, 6, 0, 9] {
            send(&r, &m, &data, i, 10, 100);
        }
        r.merge(&m, "/", None, &MergeRequest::new(42, 10, "big.bin"))
            .unwrap();
        assert_eq!(fs::read(temp.path().join("big.bin")).unwrap(), data);
    }

    #[test]
    fn test_short_final_chunk() {
        let temp = TempDir::new().unwrap();
        let m = mount(&temp);
        let r = ChunkReassembler::new();
        let data = payload(250);

        for i in (0..3).rev() {
            send(&r, &m, &data, i, 3, 100);
        }
        r.merge(&m, "/", None, &MergeRequest::new(42, 3, "big.bin"))
            .unwrap();
        assert_eq!(fs::read(temp.path().join("big.bin")).unwrap(), data);
    }

    #[test]
    fn test_incomplete_merge_keeps_parts() {
        let temp = TempDir::new().unwrap();
        let m = mount(&temp);
        let r = ChunkReassembler::new();
        let data = payload(300);

        send(&r, &m, &data, 0, 3, 100);
        send(&r, &m, &data, 2, 3, 100);

        let err = r
            .merge(&m, "/", None, &MergeRequest::new(42, 3, "big.bin"))
            .unwrap_err();
        assert!(matches!(err, FinderError::IncompleteTransfer { missing: 1, .. }));
        assert_eq!(part_files(&temp).len(), 2);
        assert!(!temp.path().join("big.bin").exists());

        // retry after the missing part arrives
        send(&r, &m, &data, 1, 3, 100);
        r.merge(&m, "/", None, &MergeRequest::new(42, 3, "big.bin"))
            .unwrap();
        assert_eq!(fs::read(temp.path().join("big.bin")).unwrap(), data);
    }

    #[test]
    fn test_read_failure_during_merge_keeps_parts() {
        let temp = TempDir::new().unwrap();
        let m = mount(&temp);
        let r = ChunkReassembler::new();
        let data = payload(300);
        for i in 0..3 {
            send(&r, &m, &data, i, 3, 100);
        }

        let failing = Mount::new(Arc::new(FailingVolume {
            inner: LocalVolume::new("uploads", temp.path()).unwrap(),
            fail_on: "big.bin.1_3.part_42".to_string(),
            after: 10,
        }));
        assert!(r
            .merge(&failing, "/", None, &MergeRequest::new(42, 3, "big.bin"))
            .is_err());

        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(part_files(&temp).len(), 3);
        assert!(!names.iter().any(|n| n.contains(".merging_")));
        assert!(!temp.path().join("big.bin").exists());

        // the healthy volume can still merge the same parts
        r.merge(&m, "/", None, &MergeRequest::new(42, 3, "big.bin"))
            .unwrap();
        assert_eq!(fs::read(temp.path().join("big.bin")).unwrap(), data);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let temp = TempDir::new().unwrap();
        let m = mount(&temp);
        let r = ChunkReassembler::new();
        let chunk: ChunkName = "f.bin.0_1.part".parse().unwrap();
        let range: ChunkRange = "0,10,10".parse().unwrap();
        let err = r
            .write_chunk(&m, "/", None, 1, &chunk, &range, b"short")
            .unwrap_err();
        assert!(matches!(err, FinderError::InvalidChunk(_)));
        assert!(part_files(&temp).is_empty());
    }

    #[test]
    fn test_upload_dir_override() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        let m = mount(&temp);
        let r = ChunkReassembler::new();
        let chunk: ChunkName = "f.bin.0_1.part".parse().unwrap();
        let range: ChunkRange = "0,3,3".parse().unwrap();
        r.write_chunk(&m, "/", Some("/sub"), 7, &chunk, &range, b"abc")
            .unwrap();
        let info = r
            .merge(&m, "/", Some("/sub"), &MergeRequest::new(7, 1, "f.bin"))
            .unwrap();
        assert_eq!(info.hash, m.hash("/sub/f.bin"));
        assert_eq!(fs::read(temp.path().join("sub/f.bin")).unwrap(), b"abc");
    }

    #[test]
    fn test_concurrent_merges_are_serialized() {
        let temp = TempDir::new().unwrap();
        let m = mount(&temp);
        let r = Arc::new(ChunkReassembler::new());
        let data = payload(400);
        for i in 0..4 {
            send(&r, &m, &data, i, 4, 100);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = Arc::clone(&r);
                let m = m.clone();
                std::thread::spawn(move || {
                    r.merge(&m, "/", None, &MergeRequest::new(42, 4, "big.bin"))
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(fs::read(temp.path().join("big.bin")).unwrap(), data);
        assert!(part_files(&temp).is_empty());
        assert!(r.merging.is_empty());
    }
}
