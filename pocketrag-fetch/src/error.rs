//! Error types for artifact acquisition

use std::path::{Path, PathBuf};

/// Result type for artifact cache operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Everything that can go wrong while making an artifact local.
///
/// The variants split along the line callers care about: transfer failures
/// may be retried, storage failures and integrity failures may not.
///
/// # Error Categories
///
/// - **Transfer**: network or remote-side failures, retryable unless the remote
///   answered with a definitive client error
/// - **Storage**: disk full, permissions, missing directories; never retried
/// - **Integrity**: the bytes on disk are not the bytes that were asked for
/// - **Lifecycle**: contention on the destination path and cancellation
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The remote resource could not be (fully) transferred
    #[error("transfer of {url} failed: {message}")]
    Transfer {
        url: String,
        message: String,
        retryable: bool,
    },

    /// Local storage rejected a read, write, or rename
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another caller holds the destination path
    #[error("a transfer to {path} is already in progress")]
    AlreadyInProgress { path: PathBuf },

    /// The finished file does not hash to the expected digest
    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The file on disk does not have the expected length
    #[error("length mismatch for {path}: expected {expected} bytes, found {actual}")]
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The caller cancelled the transfer
    #[error("transfer cancelled")]
    Cancelled,

    /// The request itself cannot be served
    #[error("invalid fetch request: {message}")]
    InvalidRequest { message: String },
}

impl FetchError {
    /// Create a retryable transfer error.
    ///
    /// Use this for connection resets, truncated bodies, timeouts and other
    /// failures where trying again from the current partial offset may succeed.
    pub fn transfer(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            url: url.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a transfer error that retrying will not fix (e.g. `404 Not Found`).
    pub fn fatal_transfer(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            url: url.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Wrap an IO failure at `path` as a storage error.
    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create an invalid request error with a custom message.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether the cache may transparently try again.
    ///
    /// Only transfer errors flagged as retryable qualify. Storage errors are
    /// surfaced to the caller untouched.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transfer {
                retryable: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::transfer("http://x", "reset").is_retryable());
        assert!(!FetchError::fatal_transfer("http://x", "404").is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());

        let disk_full = std::io::Error::other("no space left on device");
        assert!(!FetchError::storage("/tmp/model.gguf", disk_full).is_retryable());
    }

    #[test]
    fn test_error_messages_name_the_resource() {
        let err = FetchError::AlreadyInProgress {
            path: PathBuf::from("/models/a.gguf"),
        };
        assert_eq!(
            err.to_string(),
            "a transfer to /models/a.gguf is already in progress"
        );
    }
}
