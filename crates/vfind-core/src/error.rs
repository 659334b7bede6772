use std::io;

use thiserror::Error;

/// Errors that can occur while serving connector operations
#[derive(Error, Debug)]
pub enum FinderError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Path escapes volume root: {0}")]
    PathEscape(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Locked: {0}")]
    Locked(String),

    #[error("Incomplete transfer for {filename}: part {missing} of {total} is missing")]
    IncompleteTransfer {
        filename: String,
        missing: u32,
        total: u32,
    },

    #[error("Chunk write failed for part {part}: {reason}")]
    ChunkWriteFailed { part: String, reason: String },

    #[error("Invalid chunk descriptor: {0}")]
    InvalidChunk(String),

    #[error("Archive too large: {size} bytes exceeds limit of {limit} bytes")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("Archive export failed: {0}")]
    ArchiveExportFailed(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FinderError {
    /// Wire error code understood by the client
    pub fn code(&self) -> &'static str {
        match self {
            FinderError::InvalidTarget(_) => "errCmdParams",
            FinderError::VolumeNotFound(_) => "errFolderNotFound",
            FinderError::PathNotFound(_) => "errFileNotFound",
            FinderError::PathEscape(_) => "errPerm",
            FinderError::AlreadyExists(_) => "errExists",
            FinderError::InvalidName(_) => "errInvalidName",
            FinderError::Locked(_) => "errLocked",
            FinderError::IncompleteTransfer { .. } => "errUploadTransfer",
            FinderError::ChunkWriteFailed { .. } => "errUploadFile",
            FinderError::InvalidChunk(_) => "errUploadFile",
            FinderError::ArchiveTooLarge { .. } => "errArcMaxSize",
            FinderError::ArchiveExportFailed(_) => "errArchive",
            FinderError::ArtifactNotFound(_) => "errFileNotFound",
            FinderError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => "errFileNotFound",
                io::ErrorKind::PermissionDenied => "errPerm",
                io::ErrorKind::AlreadyExists => "errExists",
                _ => "errUnknown",
            },
        }
    }
}

impl From<zip::result::ZipError> for FinderError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => FinderError::ArchiveExportFailed(io.to_string()),
            other => FinderError::ArchiveExportFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FinderError>;
