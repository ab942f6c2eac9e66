//! Feature-hashing embedder
//!
//! Maps text to a fixed-dimension vector by hashing lowercase word unigrams and
//! bigrams into signed buckets, then normalising to unit length. There is no
//! learned model behind it, but it is deterministic, fast, and texts that share
//! words land close together, which is all the retrieval pipeline needs to be
//! exercised end to end on any device.

use crate::error::{EmbedError, Result};
use crate::provider::{InferenceContext, LoadMode, ModelLoader, check_embedding, l2_normalize};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;
use std::path::Path;

const BIGRAM_WEIGHT: f32 = 0.5;

/// Loader for [`HashingContext`]s.
///
/// The artifact is only checked for existence, so a pipeline wired with this
/// loader still exercises the full fetch-then-load path.
#[derive(Debug, Clone)]
pub struct HashingLoader {
    dimension: usize,
}

impl HashingLoader {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be at least 1"));
        }
        Ok(Self { dimension })
    }
}

#[async_trait]
impl ModelLoader for HashingLoader {
    type Context = HashingContext;

    async fn load(&self, path: &Path, mode: LoadMode) -> Result<HashingContext> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| EmbedError::load(path, e.to_string()))?;
        if !metadata.is_file() {
            return Err(EmbedError::load(path, "not a regular file"));
        }

        let model_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "hashing".to_string());
        tracing::info!(
            model = %model_name,
            dimension = self.dimension,
            ?mode,
            bytes = metadata.len(),
            "loaded hashing model"
        );
        Ok(HashingContext::new(model_name, self.dimension, mode))
    }
}

/// A loaded feature-hashing model.
#[derive(Debug, Clone)]
pub struct HashingContext {
    model_name: String,
    dimension: usize,
    mode: LoadMode,
}

impl HashingContext {
    /// Build a context directly, without an artifact on disk.
    pub fn new(model_name: impl Into<String>, dimension: usize, mode: LoadMode) -> Self {
        Self {
            model_name: model_name.into(),
            dimension: dimension.max(1),
            mode,
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        for token in &tokens {
            self.add_feature(&mut vector, &[token], 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &[&pair[0], &pair[1]], BIGRAM_WEIGHT);
        }

        l2_normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], parts: &[&String], weight: f32) {
        let mut hasher = FnvHasher::default();
        for part in parts {
            hasher.write(part.as_bytes());
            hasher.write_u8(0);
        }
        let hash = hasher.finish();
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl InferenceContext for HashingContext {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.mode != LoadMode::Embedding {
            return Err(EmbedError::embedding(format!(
                "model {} was loaded for generation, not embedding",
                self.model_name
            )));
        }
        let vector = self.vectorize(text);
        check_embedding(self.dimension, &vector)?;
        tracing::trace!(model = %self.model_name, chars = text.len(), "embedded text");
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embed_is_deterministic_and_normalized() {
        let ctx = HashingContext::new("test", 64, LoadMode::Embedding);
        let a = ctx.embed("The quick brown fox").await.unwrap();
        let b = ctx.embed("the QUICK brown fox!").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let ctx = HashingContext::new("test", 256, LoadMode::Embedding);
        let query = ctx.embed("rust vector search").await.unwrap();
        let near = ctx.embed("fast vector search in rust").await.unwrap();
        let far = ctx.embed("baking sourdough bread").await.unwrap();
        assert!(cosine(&query, &near) > cosine(&query, &far));
    }

    #[tokio::test]
    async fn test_empty_text_gives_zero_vector() {
        let ctx = HashingContext::new("test", 8, LoadMode::Embedding);
        assert_eq!(ctx.embed("  ...  ").await.unwrap(), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn test_generation_context_refuses_to_embed() {
        let ctx = HashingContext::new("test", 8, LoadMode::Generation);
        assert!(matches!(
            ctx.embed("hello").await,
            Err(EmbedError::Embedding { .. })
        ));
    }

    #[tokio::test]
    async fn test_loader_requires_artifact() {
        let dir = tempdir().unwrap();
        let loader = HashingLoader::new(16).unwrap();

        let missing = loader
            .load(&dir.path().join("absent.gguf"), LoadMode::Embedding)
            .await;
        assert!(matches!(missing, Err(EmbedError::Load { .. })));

        let path = dir.path().join("nomic-embed.gguf");
        std::fs::write(&path, b"weights").unwrap();
        let ctx = loader.load(&path, LoadMode::Embedding).await.unwrap();
        assert_eq!(ctx.model_name(), "nomic-embed");
        assert_eq!(ctx.dimension(), 16);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            HashingLoader::new(0),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let ctx = HashingContext::new("test", 32, LoadMode::Embedding);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = ctx.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], ctx.embed("alpha").await.unwrap());
        assert_eq!(batch[1], ctx.embed("beta").await.unwrap());
    }
}
