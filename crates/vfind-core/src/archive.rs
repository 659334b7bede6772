//! Zip export of volume contents.
//!
//! Export is two-phase: [`ArchiveExporter::plan`] stats every target and
//! sums the bytes to be archived, then [`ArchiveExporter::export`] enforces
//! the size ceiling before a single byte is written and streams the zip into
//! a temporary file. Only a fully written archive is ever registered as a
//! download artifact.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, Timelike, Utc};
use tracing::{info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::artifact::ArtifactRegistry;
use crate::error::{FinderError, Result};
use crate::ops;
use crate::registry::{Mount, Resolved};
use crate::volume::{base_name, is_root, join_path};

pub const ZIP_MIME: &str = "application/zip";

/// Default size ceiling for a single export (1 GiB)
pub const DEFAULT_MAX_SIZE: u64 = 1 << 30;

/// One top-level target of an export
#[derive(Debug, Clone)]
pub struct ArchiveItem {
    pub mount: Mount,
    pub path: String,
    pub is_dir: bool,
    /// Recursive byte total for directories
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveJob {
    pub items: Vec<ArchiveItem>,
    pub total_size: u64,
}

/// A registered, ready-to-download archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    pub key: String,
    pub name: String,
    pub mime: String,
}

pub struct ArchiveExporter {
    tmp_dir: PathBuf,
    max_size: u64,
    artifacts: Arc<ArtifactRegistry>,
}

impl ArchiveExporter {
    pub fn new(tmp_dir: impl Into<PathBuf>, max_size: u64, artifacts: Arc<ArtifactRegistry>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            max_size,
            artifacts,
        }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn artifacts(&self) -> &Arc<ArtifactRegistry> {
        &self.artifacts
    }

    /// Stat each resolved target and compute the total export size.
    pub fn plan(&self, targets: Vec<Resolved>) -> Result<ArchiveJob> {
        let mut job = ArchiveJob::default();
        for Resolved { mount, path } in targets {
            let entry = mount.volume.stat(&path)?;
            let size = if entry.is_dir {
                ops::total_size(&mount, &path)?
            } else {
                entry.size
            };
            job.total_size = job.total_size.saturating_add(size);
            job.items.push(ArchiveItem {
                mount,
                path,
                is_dir: entry.is_dir,
                size,
            });
        }
        Ok(job)
    }

    /// Reject a job above the ceiling.
    pub fn check(&self, job: &ArchiveJob) -> Result<()> {
        if job.total_size > self.max_size {
            return Err(FinderError::ArchiveTooLarge {
                size: job.total_size,
                limit: self.max_size,
            });
        }
        Ok(())
    }

    /// Write the archive and register it under a fresh random key.
    #[instrument(skip(self, job), fields(items = job.items.len(), size = job.total_size), level = "debug")]
    pub fn export(&self, job: &ArchiveJob) -> Result<ArchiveArtifact> {
        self.check(job)?;

        // Dropping the temp file on any early return deletes it
        let mut temp = tempfile::Builder::new()
            .prefix("vfind-")
            .suffix(".zip")
            .tempfile_in(&self.tmp_dir)
            .map_err(|e| FinderError::ArchiveExportFailed(e.to_string()))?;

        write_archive(temp.as_file_mut(), job)?;
        temp.as_file().sync_all()?;

        let path = temp
            .into_temp_path()
            .keep()
            .map_err(|e| FinderError::ArchiveExportFailed(e.to_string()))?;

        let key = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}{}.zip", Utc::now().format("%Y%m%d%H%M%S"), key);
        self.artifacts.put(key.clone(), path);

        info!(key = %key, items = job.items.len(), bytes = job.total_size, "Archive exported");
        Ok(ArchiveArtifact {
            key,
            name,
            mime: ZIP_MIME.to_string(),
        })
    }
}

fn write_archive(file: &mut File, job: &ArchiveJob) -> Result<()> {
    let mut zip = ZipWriter::new(file);
    let mut used = HashSet::new();
    for item in &job.items {
        // entries are named relative to the parent of each top-level target
        let name = if is_root(&item.path) {
            item.mount.name()
        } else {
            base_name(&item.path)
        };
        let entry_name = unique_entry_name(name, item.is_dir, &mut used);
        if let Err(e) = add_path(&mut zip, &item.mount, &item.path, &entry_name) {
            warn!(volume = %item.mount.name(), path = %item.path, error = %e, "Archive export aborted");
            return Err(e);
        }
    }
    zip.finish()?;
    Ok(())
}

/// Top-level names must be distinct inside one archive; repeats become
/// `name~N.ext` for files and `name~N` for directories.
fn unique_entry_name(name: &str, is_dir: bool, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 && !is_dir => name.split_at(idx),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{}~{}{}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn add_path<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    mount: &Mount,
    path: &str,
    entry_name: &str,
) -> Result<()> {
    let entry = mount.volume.stat(path)?;
    let options = entry_options(entry.modified, entry.size);

    if !entry.is_dir {
        zip.start_file(entry_name.to_string(), options)?;
        let mut reader = mount.volume.open(path)?;
        io::copy(&mut reader, zip)
            .map_err(|e| FinderError::ArchiveExportFailed(format!("{}: {}", path, e)))?;
        return Ok(());
    }

    zip.add_directory(format!("{}/", entry_name), options)?;
    for child in mount.volume.list(path)? {
        let child_path = join_path(path, &child.name);
        add_path(zip, mount, &child_path, &format!("{}/{}", entry_name, child.name))?;
    }
    Ok(())
}

fn entry_options(modified: i64, size: u64) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(size >= u64::from(u32::MAX));
    if let Some(ts) = zip_time(modified) {
        options = options.last_modified_time(ts);
    }
    options
}

/// Zip timestamps cover 1980..=2107; anything else keeps the default.
fn zip_time(secs: i64) -> Option<zip::DateTime> {
    let t = chrono::DateTime::from_timestamp(secs, 0)?;
    zip::DateTime::from_date_and_time(
        u16::try_from(t.year()).ok()?,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    )
    .ok()
}
