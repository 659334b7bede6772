//! JSON response envelope.
//!
//! One struct covers every command; unset fields are omitted from the JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vfind_core::info::VolumeOptions;
use vfind_core::FileInfo;

/// Protocol version reported on `open` with `init`
pub const API_VERSION: &str = "2.1050";

/// Result of a zip export, echoed back by the client to download it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipdlInfo {
    pub mime: String,
    pub file: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<Vec<FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<VolumeOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upl_max_size: Option<String>,

    /// `ls`: hash -> name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,
    /// `mkdir` with `dirs[]`: relative path -> hash
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<Vec<String>>,

    #[serde(rename = "_chunkmerged", skip_serializing_if = "Option::is_none")]
    pub chunk_merged: Option<String>,
    #[serde(rename = "_name", skip_serializing_if = "Option::is_none")]
    pub chunk_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zipdl: Option<ZipdlInfo>,

    /// `[code, detail]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<(String, String)>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: Some((code.into(), detail.into())),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn with_added(mut self, added: Vec<FileInfo>) -> Self {
        self.added = Some(added);
        self
    }

    pub fn with_removed(mut self, removed: Vec<String>) -> Self {
        self.removed = Some(removed);
        self
    }

    /// Attach per-file warnings, leaving the field out when there are none
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        if !warnings.is_empty() {
            self.warning = Some(warnings);
        }
        self
    }
}
