//! # pocketrag-embed
//!
//! Turns local model artifacts into inference contexts that map text to
//! fixed-dimension `f32` vectors.
//!
//! ## Features
//!
//! - **Explicit ownership**: a [`ModelLoader`] returns an owned context; there
//!   is no global model registry
//! - **Checked output**: every vector has the declared dimension and only finite
//!   components, or the call fails
//! - **Cancellable**: [`InferenceContext::embed_cancellable`] stops waiting as soon
//!   as the caller's token fires
//! - **Two backends**: deterministic feature hashing (always available) and ONNX
//!   models through `fastembed` (cargo feature `onnx`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use pocketrag_embed::{HashingLoader, InferenceContext, LoadMode, ModelLoader};
//! use std::path::Path;
//!
//! # async fn example() -> pocketrag_embed::Result<()> {
//! let loader = HashingLoader::new(768)?;
//! let ctx = loader
//!     .load(Path::new("/tmp/models/nomic-embed.gguf"), LoadMode::Embedding)
//!     .await?;
//! let vector = ctx.embed("Hello world").await?;
//! assert_eq!(vector.len(), ctx.dimension());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`provider`]: loader and context traits, output checks
//! - [`hashing`]: the feature-hashing embedder
//! - `onnx`: fastembed-backed ONNX models (feature `onnx`)
//! - [`error`]: error types

pub mod error;
pub mod hashing;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod provider;

pub use error::{EmbedError, Result};
pub use hashing::{HashingContext, HashingLoader};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxContext, OnnxLoader};
pub use provider::{
    InferenceContext, LoadMode, ModelLoader, ProviderKind, check_embedding, l2_normalize,
};
