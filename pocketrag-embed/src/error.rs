//! Error types for model loading and embedding

use std::path::PathBuf;

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Errors raised by model loaders and inference contexts.
///
/// Loader failures surface as [`EmbedError::Load`] and inference failures as
/// [`EmbedError::Embedding`]. Neither is retried automatically, and no
/// default vector is ever substituted for a failed one.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The model at `path` could not be loaded
    #[error("failed to load model {path}: {message}")]
    Load { path: PathBuf, message: String },

    /// Inference failed or produced an unusable vector
    #[error("embedding failed: {source}")]
    Embedding {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A vector came back with the wrong number of components
    #[error("embedding has dimension {actual}, model declares {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid loader or context configuration
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// The caller cancelled the operation
    #[error("embedding cancelled")]
    Cancelled,

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl EmbedError {
    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap any error raised while producing a vector.
    pub fn embedding<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Embedding {
            source: source.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_from_message() {
        let err = EmbedError::embedding("tokenizer exploded");
        assert_eq!(err.to_string(), "embedding failed: tokenizer exploded");
    }

    #[test]
    fn test_load_mentions_path() {
        let err = EmbedError::load("/models/missing.gguf", "no such file");
        assert!(err.to_string().contains("/models/missing.gguf"));
    }
}
