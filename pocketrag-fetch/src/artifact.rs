//! Artifact identity and on-disk completion state

use crate::error::{FetchError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable cache key for a remote artifact.
///
/// Derived from the source URL (first 16 hex digits of its blake3 hash) or
/// from an explicit logical name. The key is part of the partial file name,
/// so bytes fetched from one URL are never resumed against another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Derive a key from the artifact's source URL.
    pub fn from_url(url: &str) -> Self {
        let hash = blake3::hash(url.as_bytes());
        Self(hash.to_hex().as_str()[..16].to_string())
    }

    /// Use a logical name as key. Characters outside `[A-Za-z0-9_-]` become `_`.
    pub fn named(name: &str) -> Self {
        let cleaned = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self(cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much of an artifact is present locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Nothing on disk
    Absent,
    /// An interrupted transfer left this many bytes in the partial file
    Partial { bytes: u64 },
    /// The destination file exists and is non-empty
    Complete { bytes: u64 },
}

impl CompletionState {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Snapshot of an artifact as seen on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub key: ArtifactKey,
    pub url: String,
    pub local_path: PathBuf,
    pub partial_path: PathBuf,
    pub expected_len: Option<u64>,
    pub observed_len: u64,
    pub state: CompletionState,
}

/// Location of the in-progress file for `destination` under `key`.
///
/// The partial sits in the same directory as the destination so the final
/// rename never crosses a filesystem boundary.
pub fn partial_path_for(destination: &Path, key: &ArtifactKey) -> Result<PathBuf> {
    let file_name = destination.file_name().ok_or_else(|| {
        FetchError::invalid_request(format!(
            "destination {} does not name a file",
            destination.display()
        ))
    })?;

    let mut partial_name = file_name.to_os_string();
    partial_name.push(format!(".{key}.part"));
    Ok(destination.with_file_name(partial_name))
}
