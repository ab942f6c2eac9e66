//! # pocketrag-fetch
//!
//! Resumable acquisition of large model artifacts onto local storage.
//!
//! ## Features
//!
//! - **Cache hits are free**: a complete destination file is returned without
//!   touching the network
//! - **Resumable transfers**: interrupted downloads continue from the bytes
//!   already on disk using HTTP `Range` requests
//! - **Atomic publication**: bytes land in a `.part` file that is renamed into
//!   place only when complete (and, optionally, digest-verified)
//! - **Single transfer per path**: concurrent callers for one destination wait
//!   for (or fail fast against) the transfer already running
//! - **Cancellable**: every request carries a cancellation token
//!
//! ## Quick Start
//!
//! ```no_run
//! use pocketrag_fetch::{ArtifactCache, CacheOptions, FetchRequest, HttpSource};
//! use std::time::Duration;
//!
//! # async fn example() -> pocketrag_fetch::Result<()> {
//! let source = HttpSource::new("pocketrag/0.1", Duration::from_secs(30))?;
//! let cache = ArtifactCache::new(source, CacheOptions::default());
//!
//! let (events, progress) = flume::unbounded();
//! let request = FetchRequest::new(
//!     "https://huggingface.co/nomic-ai/nomic-embed-text-v1.5-GGUF/resolve/main/nomic-embed-text-v1.5.Q4_K_M.gguf",
//!     "/tmp/models/nomic-embed.gguf",
//! )
//! .with_progress(events);
//!
//! let path = cache.ensure_local(&request).await?;
//! for event in progress.drain() {
//!     println!("{event:?}");
//! }
//! println!("model at {}", path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`cache`]: the ensure-local state machine, retries and per-path locking
//! - [`source`]: the [`RemoteSource`] seam and its HTTP implementation
//! - [`request`]: request options and progress events
//! - [`artifact`]: cache keys and on-disk completion state
//! - [`error`]: error types and retry classification

pub mod artifact;
pub mod cache;
pub mod error;
pub mod request;
pub mod source;

pub use artifact::{ArtifactKey, CompletionState, ModelArtifact};
pub use cache::{ArtifactCache, CacheOptions, Contention, file_digest, verify_digest};
pub use error::{FetchError, Result};
pub use request::{FetchEvent, FetchRequest};
pub use source::{ByteStream, HttpSource, RemoteBody, RemoteSource};
pub use tokio_util::sync::CancellationToken;
