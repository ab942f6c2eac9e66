//! Choosing an embedding backend from configuration

use async_trait::async_trait;
use pocketrag_embed::{
    EmbedError, HashingContext, HashingLoader, InferenceContext, LoadMode, ModelLoader,
    ProviderKind,
};
use std::path::Path;

#[cfg(feature = "onnx")]
use pocketrag_embed::{OnnxContext, OnnxLoader};

/// Loader for whichever provider the configuration names.
#[derive(Debug, Clone)]
pub struct ConfiguredLoader {
    provider: ProviderKind,
    dimension: usize,
}

impl ConfiguredLoader {
    pub fn new(provider: ProviderKind, dimension: usize) -> Self {
        Self {
            provider,
            dimension,
        }
    }
}

/// An inference context from any provider.
#[derive(Debug)]
pub enum EmbeddingModel {
    Hashing(HashingContext),
    #[cfg(feature = "onnx")]
    Onnx(OnnxContext),
}

#[async_trait]
impl ModelLoader for ConfiguredLoader {
    type Context = EmbeddingModel;

    /// `path` is the fetched artifact. ONNX models are loaded from the
    /// directory that holds it, next to their tokenizer files.
    async fn load(&self, path: &Path, mode: LoadMode) -> pocketrag_embed::Result<EmbeddingModel> {
        match self.provider {
            ProviderKind::Hashing => {
                let context = HashingLoader::new(self.dimension)?.load(path, mode).await?;
                Ok(EmbeddingModel::Hashing(context))
            }
            #[cfg(feature = "onnx")]
            ProviderKind::Onnx => {
                let dir = path
                    .parent()
                    .ok_or_else(|| EmbedError::load(path, "artifact has no parent directory"))?;
                let context = OnnxLoader::new().load(dir, mode).await?;
                if context.dimension() != self.dimension {
                    tracing::warn!(
                        configured = self.dimension,
                        actual = context.dimension(),
                        "model dimension differs from configuration, using the model's"
                    );
                }
                Ok(EmbeddingModel::Onnx(context))
            }
            #[cfg(not(feature = "onnx"))]
            ProviderKind::Onnx => Err(EmbedError::invalid_config(
                "provider \"onnx\" requires building with the `onnx` feature",
            )),
        }
    }
}

#[async_trait]
impl InferenceContext for EmbeddingModel {
    async fn embed(&self, text: &str) -> pocketrag_embed::Result<Vec<f32>> {
        match self {
            Self::Hashing(context) => context.embed(text).await,
            #[cfg(feature = "onnx")]
            Self::Onnx(context) => context.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> pocketrag_embed::Result<Vec<Vec<f32>>> {
        match self {
            Self::Hashing(context) => context.embed_batch(texts).await,
            #[cfg(feature = "onnx")]
            Self::Onnx(context) => context.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            Self::Hashing(context) => context.dimension(),
            #[cfg(feature = "onnx")]
            Self::Onnx(context) => context.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::Hashing(context) => context.model_name(),
            #[cfg(feature = "onnx")]
            Self::Onnx(context) => context.model_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_provider_uses_configured_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("tiny.gguf");
        std::fs::write(&artifact, b"weights").unwrap();

        let model = ConfiguredLoader::new(ProviderKind::Hashing, 32)
            .load(&artifact, LoadMode::Embedding)
            .await
            .unwrap();
        assert_eq!(model.dimension(), 32);
        assert_eq!(model.model_name(), "tiny");
        assert_eq!(model.embed("hello").await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfiguredLoader::new(ProviderKind::Hashing, 8)
            .load(&dir.path().join("absent.gguf"), LoadMode::Embedding)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::Load { .. }));
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_onnx_needs_the_feature() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfiguredLoader::new(ProviderKind::Onnx, 8)
            .load(&dir.path().join("model.onnx"), LoadMode::Embedding)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfig { .. }));
    }
}
