//! # vfind-core
//!
//! Multi-volume file addressing and the stateful connector operations.
//!
//! Every file is addressed by an opaque target string that names both its
//! volume and its path inside that volume:
//!
//! ```text
//! v3f2a9c01d4e5b6a7_ZG9jcy9hLnR4dA
//! └── volume id ──┘ └─ base64url("docs/a.txt")
//! ```
//!
//! ## Layout
//!
//! - [`target`]: reversible target codec
//! - [`volume`] / [`local`]: storage contract and the on-disk backend
//! - [`registry`]: volume id derivation and lookup
//! - [`info`] / [`ops`]: client-facing entry metadata and single-shot file operations
//! - [`chunk`]: chunked upload reassembly
//! - [`archive`] / [`artifact`]: zip export and one-shot download artifacts

pub mod archive;
pub mod artifact;
pub mod chunk;
mod error;
pub mod info;
pub mod local;
pub mod ops;
pub mod registry;
pub mod target;
pub mod volume;

pub use archive::{ArchiveArtifact, ArchiveExporter, ArchiveJob, ZIP_MIME};
pub use artifact::{ArtifactRegistry, TakenArtifact};
pub use chunk::{ChunkName, ChunkRange, ChunkReassembler, MergeRequest};
pub use error::{FinderError, Result};
pub use info::FileInfo;
pub use local::LocalVolume;
pub use registry::{volume_id, Mount, Resolved, VolumeRegistry};
pub use target::Target;
pub use volume::{Entry, Volume};
