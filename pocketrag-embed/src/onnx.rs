//! ONNX sentence-embedding models through `fastembed`
//!
//! The loader expects a model directory laid out like a HuggingFace export:
//! `model.onnx` (or `onnx/model.onnx`), `tokenizer.json`, `config.json`,
//! `special_tokens_map.json` and optionally `tokenizer_config.json`.

use crate::error::{EmbedError, Result};
use crate::provider::{InferenceContext, LoadMode, ModelLoader, check_embedding, l2_normalize};
use async_trait::async_trait;
use fastembed::{TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Texts per inference call
const BATCH_SIZE: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct OnnxLoader;

impl OnnxLoader {
    pub fn new() -> Self {
        Self
    }

    fn model_file(dir: &Path) -> Result<PathBuf> {
        [dir.join("model.onnx"), dir.join("onnx").join("model.onnx")]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| EmbedError::load(dir, "no model.onnx in model directory"))
    }

    async fn read(dir: &Path, name: &str) -> Result<Vec<u8>> {
        let path = dir.join(name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| EmbedError::load(&path, e.to_string()))
    }

    async fn tokenizer_files(dir: &Path) -> Result<TokenizerFiles> {
        let tokenizer_config_path = dir.join("tokenizer_config.json");
        let tokenizer_config_file = if tokenizer_config_path.is_file() {
            Self::read(dir, "tokenizer_config.json").await?
        } else {
            let minimal = serde_json::json!({
                "clean_up_tokenization_spaces": true,
                "do_lower_case": false,
                "model_max_length": 512,
                "tokenizer_class": "BertTokenizer"
            });
            serde_json::to_vec_pretty(&minimal).map_err(|e| EmbedError::load(dir, e.to_string()))?
        };

        Ok(TokenizerFiles {
            tokenizer_file: Self::read(dir, "tokenizer.json").await?,
            config_file: Self::read(dir, "config.json").await?,
            special_tokens_map_file: Self::read(dir, "special_tokens_map.json").await?,
            tokenizer_config_file,
        })
    }
}

#[async_trait]
impl ModelLoader for OnnxLoader {
    type Context = OnnxContext;

    async fn load(&self, path: &Path, mode: LoadMode) -> Result<OnnxContext> {
        if mode != LoadMode::Embedding {
            return Err(EmbedError::load(
                path,
                "ONNX sentence encoders only support embedding mode",
            ));
        }
        let onnx_file = tokio::fs::read(Self::model_file(path)?)
            .await
            .map_err(|e| EmbedError::load(path, e.to_string()))?;
        let tokenizer_files = Self::tokenizer_files(path).await?;
        let user_model = UserDefinedEmbeddingModel::new(onnx_file, tokenizer_files);

        let model_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());
        let dir = path.to_path_buf();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let mut model =
                    TextEmbedding::try_new_from_user_defined(user_model, Default::default())
                        .map_err(|e| EmbedError::load(&dir, format!("{e:#}")))?;
                // Probe once to learn the output width
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(|e| EmbedError::load(&dir, format!("{e:#}")))?;
                let dimension = probe
                    .first()
                    .map(Vec::len)
                    .filter(|d| *d > 0)
                    .ok_or_else(|| EmbedError::load(&dir, "model produced an empty embedding"))?;
                Ok((model, dimension))
            })
            .await??;

        tracing::info!(model = %model_name, dimension, "loaded ONNX model");
        Ok(OnnxContext {
            model: Arc::new(Mutex::new(model)),
            model_name,
            dimension,
        })
    }
}

/// A loaded ONNX embedding model. Inference runs on the blocking pool.
pub struct OnnxContext {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl std::fmt::Debug for OnnxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxContext")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

#[async_trait]
impl InferenceContext for OnnxContext {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::embedding("model returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let chunk = chunk.to_vec();
            let model = Arc::clone(&self.model);
            let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model
                    .lock()
                    .map_err(|_| EmbedError::embedding("model lock poisoned"))?;
                guard.embed(chunk, None).map_err(EmbedError::embedding)
            })
            .await??;

            for mut vector in vectors {
                l2_normalize(&mut vector);
                check_embedding(self.dimension, &vector)?;
                out.push(vector);
            }
        }
        if out.len() != texts.len() {
            return Err(EmbedError::embedding(format!(
                "asked for {} embeddings, model returned {}",
                texts.len(),
                out.len()
            )));
        }
        tracing::debug!(model = %self.model_name, count = out.len(), "embedded batch");
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
