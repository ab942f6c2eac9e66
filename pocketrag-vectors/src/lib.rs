//! # pocketrag-vectors
//!
//! Persistent fixed-dimension vector collections with exact k-nearest-neighbour
//! search.
//!
//! ## Features
//!
//! - **Per-collection dimension**: declared once, enforced on every insert and query
//! - **Validation before mutation**: wrong lengths, NaN/infinite components and
//!   duplicate rowids are rejected with nothing written
//! - **Explicit metrics**: Euclidean by default, cosine only when asked for
//! - **Deterministic ranking**: ascending distance, ties by ascending rowid
//! - **Pluggable storage**: SQLite through `sqlx`, or in-memory
//!
//! ## Quick Start
//!
//! ```no_run
//! use pocketrag_vectors::{Metric, SqliteBackend, VectorStore};
//! use std::path::Path;
//!
//! # async fn example() -> pocketrag_vectors::Result<()> {
//! let store = VectorStore::new(SqliteBackend::open(Path::new("vectors.db")).await?).await?;
//! store.create_collection("documents", 3).await?;
//! store.insert("documents", 1, vec![1.0, 0.0, 0.0]).await?;
//! store.insert("documents", 2, vec![0.0, 1.0, 0.0]).await?;
//!
//! for hit in store.query("documents", &[1.0, 0.0, 0.0], 2, Metric::L2).await? {
//!     println!("{} at {}", hit.rowid, hit.distance);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`store`]: validation, locking and the query loop
//! - [`backend`]: the [`TableBackend`] contract and its implementations
//! - [`distance`]: metric functions
//! - [`types`]: records, results and [`Metric`]
//! - [`error`]: error types
//!
//! Queries are an exact linear scan, O(n·dim) per query. There is no
//! approximate index.

pub mod backend;
pub mod distance;
pub mod error;
mod search;
pub mod store;
pub mod types;

pub use backend::{MemoryBackend, RowVisitor, SqliteBackend, TableBackend};
pub use error::{Result, VectorError};
pub use store::VectorStore;
pub use types::{CollectionInfo, EmbeddingRecord, Metric, RowId, SimilarityResult};
