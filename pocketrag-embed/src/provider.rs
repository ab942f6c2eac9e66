//! Model loader and inference context contracts
//!
//! A [`ModelLoader`] turns a local artifact path into an owned
//! [`InferenceContext`]. Contexts are ordinary values: whoever loads one owns
//! it, passes it where it is needed, and releases it by dropping it.

use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// What a model is loaded for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Pooled sentence embeddings
    #[default]
    Embedding,
    /// Token generation; such contexts refuse to embed
    Generation,
}

/// Which embedding backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic feature hashing, no runtime dependencies
    #[default]
    Hashing,
    /// ONNX inference via fastembed (cargo feature `onnx`)
    Onnx,
}

/// Loads a model artifact from local storage.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    type Context: InferenceContext;

    /// Load the model at `path`. The artifact is read in place, never copied.
    async fn load(&self, path: &Path, mode: LoadMode) -> Result<Self::Context>;
}

/// A loaded model that maps text to fixed-dimension vectors.
///
/// Every vector handed out has exactly [`dimension`](Self::dimension) finite
/// components. Implementations enforce this with [`check_embedding`].
#[async_trait]
pub trait InferenceContext: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Number of components in every vector this context produces
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Embed `text`, giving up with [`EmbedError::Cancelled`] once `cancel` fires.
    async fn embed_cancellable(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EmbedError::Cancelled),
            result = self.embed(text) => result,
        }
    }
}

/// Reject vectors with the wrong length or non-finite components.
pub fn check_embedding(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if let Some((index, value)) = vector.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(EmbedError::embedding(format!(
            "component {index} is not finite ({value})"
        )));
    }
    Ok(())
}

/// Scale `vector` to unit length. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
