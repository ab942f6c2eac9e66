//! Vector store errors

/// Result type for vector store operations.
pub type Result<T> = std::result::Result<T, VectorError>;

/// Errors raised by the vector store and its backends.
///
/// Validation failures (`DimensionMismatch`, `InvalidVector`, `DuplicateKey`,
/// `InvalidCollectionName`) are detected before anything is written.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("collection {collection} holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// Collections must hold at least one component per vector
    #[error("collection dimension must be at least 1, got {dim}")]
    InvalidDimension { dim: usize },

    /// A component was NaN or infinite
    #[error("vector component {index} is not finite ({value})")]
    InvalidVector { index: usize, value: f64 },

    #[error("row {rowid} already exists in collection {collection}")]
    DuplicateKey { collection: String, rowid: i64 },

    #[error("no collection named {name}")]
    UnknownCollection { name: String },

    /// Names are 1 to 64 characters of `[A-Za-z0-9_-]`
    #[error("invalid collection name {name:?}")]
    InvalidCollectionName { name: String },

    /// Stored data that cannot be decoded
    #[error("corrupt row {rowid} in collection {collection}: {message}")]
    Corrupt {
        collection: String,
        rowid: i64,
        message: String,
    },

    #[error("storage backend error: {source}")]
    Backend {
        #[from]
        source: sqlx::Error,
    },
}

impl VectorError {
    /// Caller mistakes that retrying cannot fix.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::InvalidVector { .. }
                | Self::DuplicateKey { .. }
                | Self::InvalidCollectionName { .. }
                | Self::InvalidDimension { .. }
        )
    }
}
