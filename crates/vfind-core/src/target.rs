//! Target codec.
//!
//! A target is the opaque wire identifier of a file or directory:
//!
//! ```text
//! <volume_id>_<base64url(path without leading '/')>
//! ```
//!
//! Volume paths are always absolute (`/`, `/docs`, `/docs/a.txt`). The leading
//! separator is stripped before encoding and restored after decoding, so the
//! volume root encodes to an empty suffix (`v1a2b_`).

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};

use crate::error::{FinderError, Result};

/// Separator between the volume id and the encoded path
pub const SEPARATOR: char = '_';

/// A decoded target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub volume_id: String,
    pub path: String,
}

impl Target {
    pub fn new(volume_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            path: path.into(),
        }
    }

    pub fn encode(&self) -> String {
        encode(&self.volume_id, &self.path)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Target {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

/// Encode a volume id and an absolute volume path into a target string.
#[inline]
pub fn encode(volume_id: &str, path: &str) -> String {
    debug_assert!(!volume_id.contains(SEPARATOR));
    let relative = path.strip_prefix('/').unwrap_or(path);
    format!(
        "{}{}{}",
        volume_id,
        SEPARATOR,
        BASE64URL.encode(relative.as_bytes())
    )
}

/// Decode a target string.
///
/// Splits on the first separator. Fails with `InvalidTarget` when the
/// separator is missing, the volume id is empty, or the suffix is not
/// unpadded base64url of a UTF-8 string. Never touches the filesystem.
pub fn decode(target: &str) -> Result<Target> {
    let (volume_id, encoded) = target
        .split_once(SEPARATOR)
        .ok_or_else(|| FinderError::InvalidTarget(target.to_string()))?;

    if volume_id.is_empty() {
        return Err(FinderError::InvalidTarget(target.to_string()));
    }

    let bytes = BASE64URL
        .decode(encoded)
        .map_err(|_| FinderError::InvalidTarget(target.to_string()))?;
    let relative =
        String::from_utf8(bytes).map_err(|_| FinderError::InvalidTarget(target.to_string()))?;

    Ok(Target {
        volume_id: volume_id.to_string(),
        path: format!("/{}", relative),
    })
}
