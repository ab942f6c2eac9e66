//! What to fetch, where to put it, and how to report on it

use crate::artifact::{ArtifactKey, partial_path_for};
use crate::error::{FetchError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Progress notifications emitted while an artifact is made local.
///
/// Events arrive on the request's progress channel in the order they were
/// produced. A `Finished` event is always the last one for a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// A transfer attempt began at `resumed_from` bytes
    Started {
        resumed_from: u64,
        total: Option<u64>,
    },
    /// Bytes written so far
    Progress { downloaded: u64, total: Option<u64> },
    /// A retryable failure occurred; the next attempt resumes from the partial
    Retrying { attempt: u32, error: String },
    /// The artifact is complete at its destination
    Finished { bytes: u64, cached: bool },
}

/// A request to make one remote artifact available locally.
#[derive(Clone)]
pub struct FetchRequest {
    /// Remote location, fetched with HTTP(S) GET and byte ranges
    pub url: String,
    /// Final path of the complete file
    pub destination: PathBuf,
    /// Cache key, derived from the URL unless set explicitly
    pub key: ArtifactKey,
    /// Expected size in bytes, if known ahead of time
    pub expected_len: Option<u64>,
    /// Expected blake3 digest (hex) of the complete file
    pub expected_digest: Option<String>,
    pub(crate) progress: Option<flume::Sender<FetchEvent>>,
    pub(crate) cancel: CancellationToken,
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("key", &self.key)
            .field("expected_len", &self.expected_len)
            .field("expected_digest", &self.expected_digest)
            .field("progress", &self.progress.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, destination: impl AsRef<Path>) -> Self {
        let url = url.into();
        Self {
            key: ArtifactKey::from_url(&url),
            url,
            destination: destination.as_ref().to_path_buf(),
            expected_len: None,
            expected_digest: None,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the URL-derived cache key with a logical name.
    pub fn with_key(mut self, key: ArtifactKey) -> Self {
        self.key = key;
        self
    }

    pub fn with_expected_len(mut self, len: u64) -> Self {
        self.expected_len = Some(len);
        self
    }

    /// Require the finished file to hash to `digest` (blake3, hex encoded).
    pub fn with_expected_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into().to_ascii_lowercase());
        self
    }

    /// Send [`FetchEvent`]s to `sender`.
    ///
    /// Events are offered with `try_send`; a full bounded channel drops the
    /// event rather than stalling the transfer. Use an unbounded channel to
    /// observe every event.
    pub fn with_progress(mut self, sender: flume::Sender<FetchEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Tie the request to a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Path of the in-progress file for this request.
    pub fn partial_path(&self) -> Result<PathBuf> {
        partial_path_for(&self.destination, &self.key)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(FetchError::invalid_request(format!(
                "unsupported URL scheme: {}",
                self.url
            )));
        }
        if let Some(digest) = &self.expected_digest {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(FetchError::invalid_request(format!(
                    "expected digest is not a 64 digit hex string: {digest}"
                )));
            }
        }
        self.partial_path().map(|_| ())
    }

    pub(crate) fn emit(&self, event: FetchEvent) {
        if let Some(sender) = &self.progress {
            // A slow or departed listener must not fail the transfer
            let _ = sender.try_send(event);
        }
    }
}
