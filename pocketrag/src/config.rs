//! Pipeline configuration
//!
//! Read from a TOML file. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration:
//!
//! ```toml
//! [model]
//! url = "https://huggingface.co/nomic-ai/nomic-embed-text-v1.5-GGUF/resolve/main/nomic-embed-text-v1.5.Q4_K_M.gguf"
//! path = "models/nomic-embed-text-v1.5.Q4_K_M.gguf"
//! dimension = 768
//! provider = "hashing"
//!
//! [fetch]
//! max_retries = 3
//! retry_backoff_ms = 250
//! contention = "wait"
//!
//! [store]
//! database = "pocketrag.db"
//! collection = "documents"
//! metric = "l2"
//!
//! [worklet]
//! entry_point = "/app.lua"
//! ```

use anyhow::{Context, Result, bail};
use pocketrag_embed::ProviderKind;
use pocketrag_fetch::{CacheOptions, Contention, FetchRequest};
use pocketrag_vectors::Metric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub fetch: FetchConfig,
    pub store: StoreConfig,
    pub worklet: WorkletConfig,
}

/// Where the model artifact comes from and how it is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub url: String,
    /// Local destination of the artifact
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// Expected blake3 digest of the artifact, hex encoded
    #[serde(default)]
    pub blake3: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub provider: ProviderKind,
}

fn default_model_url() -> String {
    "https://huggingface.co/nomic-ai/nomic-embed-text-v1.5-GGUF/resolve/main/nomic-embed-text-v1.5.Q4_K_M.gguf"
        .to_string()
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/nomic-embed-text-v1.5.Q4_K_M.gguf")
}

fn default_dimension() -> usize {
    768
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            url: default_model_url(),
            path: default_model_path(),
            blake3: None,
            dimension: default_dimension(),
            provider: ProviderKind::default(),
        }
    }
}

impl ModelConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_blake3(mut self, digest: impl Into<String>) -> Self {
        self.blake3 = Some(digest.into());
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// The fetch request for this model's artifact.
    pub fn request(&self) -> FetchRequest {
        let request = FetchRequest::new(self.url.clone(), &self.path);
        match &self.blake3 {
            Some(digest) => request.with_expected_digest(digest.clone()),
            None => request,
        }
    }
}

/// File-format spelling of [`Contention`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentionPolicy {
    #[default]
    Wait,
    FailFast,
}

impl From<ContentionPolicy> for Contention {
    fn from(policy: ContentionPolicy) -> Self {
        match policy {
            ContentionPolicy::Wait => Contention::Wait,
            ContentionPolicy::FailFast => Contention::FailFast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub contention: ContentionPolicy,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Connect timeout for each transfer attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_user_agent() -> String {
    format!("pocketrag/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            contention: ContentionPolicy::default(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FetchConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn with_contention(mut self, contention: ContentionPolicy) -> Self {
        self.contention = contention;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::default()
            .with_max_retries(self.max_retries)
            .with_retry_backoff(Duration::from_millis(self.retry_backoff_ms))
            .with_contention(self.contention.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub metric: Metric,
}

fn default_database() -> PathBuf {
    PathBuf::from("pocketrag.db")
}

fn default_collection() -> String {
    "documents".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            collection: default_collection(),
            metric: Metric::default(),
        }
    }
}

impl StoreConfig {
    pub fn with_database(mut self, database: impl Into<PathBuf>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkletConfig {
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Script to run instead of the built-in one
    #[serde(default)]
    pub script: Option<PathBuf>,
}

fn default_entry_point() -> String {
    "/app.lua".to_string()
}

impl Default for WorkletConfig {
    fn default() -> Self {
        Self {
            entry_point: default_entry_point(),
            script: None,
        }
    }
}

impl WorkletConfig {
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }
}

impl PipelineConfig {
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_worklet(mut self, worklet: WorkletConfig) -> Self {
        self.worklet = worklet;
        self
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.model.dimension == 0 {
            bail!("model.dimension must be at least 1");
        }
        if self.model.url.trim().is_empty() {
            bail!("model.url must not be empty");
        }
        if self.model.path.as_os_str().is_empty() {
            bail!("model.path must not be empty");
        }
        if let Some(digest) = &self.model.blake3 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                bail!("model.blake3 must be 64 hex digits, got {digest:?}");
            }
        }
        if self.fetch.timeout_secs == 0 {
            bail!("fetch.timeout_secs must be at least 1");
        }
        if self.store.collection.is_empty() {
            bail!("store.collection must not be empty");
        }
        if self.worklet.entry_point.is_empty() {
            bail!("worklet.entry_point must not be empty");
        }
        Ok(())
    }
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig =
        toml::from_str(content).context("Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}
