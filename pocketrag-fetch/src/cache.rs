//! Ensure-local logic for large remote artifacts
//!
//! [`ArtifactCache::ensure_local`] is the one entry point. It returns the
//! destination path once the file there is complete, downloading (or resuming)
//! only when needed.
//!
//! ## On-disk protocol
//!
//! ```text
//! <dest>.<key>.part   bytes received so far, appended to on resume
//! <dest>              only ever created by renaming a finished partial
//! ```
//!
//! A reader that finds `<dest>` therefore never sees a truncated file.
//!
//! ## Contention
//!
//! Callers in one process that target the same destination are serialized on
//! a per-path lock. With [`Contention::Wait`] the second caller blocks and then
//! sees a cache hit; with [`Contention::FailFast`] it gets
//! [`FetchError::AlreadyInProgress`].

use crate::artifact::{CompletionState, ModelArtifact};
use crate::error::{FetchError, Result};
use crate::request::{FetchEvent, FetchRequest};
use crate::source::{HttpSource, RemoteSource};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// What a caller does when the destination is already being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Contention {
    /// Wait for the other transfer, then reuse its result
    #[default]
    Wait,
    /// Return [`FetchError::AlreadyInProgress`] immediately
    FailFast,
}

/// Tuning knobs for the cache.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Extra attempts after a retryable transfer failure
    pub max_retries: u32,
    /// Delay before retry `n` is `n * retry_backoff`
    pub retry_backoff: Duration,
    pub contention: Contention,
    /// Minimum bytes between two `Progress` events
    pub progress_step: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(250),
            contention: Contention::Wait,
            progress_step: 1 << 20,
        }
    }
}

impl CacheOptions {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_contention(mut self, contention: Contention) -> Self {
        self.contention = contention;
        self
    }

    pub fn with_progress_step(mut self, bytes: u64) -> Self {
        self.progress_step = bytes.max(1);
        self
    }
}

/// Makes remote artifacts available on local storage.
///
/// Holds no file content in memory; all state lives on disk next to the
/// destination paths it manages.
pub struct ArtifactCache<S = HttpSource> {
    source: S,
    options: CacheOptions,
    in_flight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: RemoteSource> ArtifactCache<S> {
    pub fn new(source: S, options: CacheOptions) -> Self {
        Self {
            source,
            options,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Return the path of a complete local copy of `request.url`.
    ///
    /// A complete destination file is returned as is (after digest and length
    /// checks when the request asks for them). Otherwise the artifact is
    /// transferred, resuming from any partial left by an earlier attempt, and
    /// atomically moved into place.
    ///
    /// # Errors
    /// - [`FetchError::Transfer`] when the remote cannot deliver; retryable
    ///   failures are retried up to `max_retries` times first
    /// - [`FetchError::Storage`] on any local IO failure, without retry
    /// - [`FetchError::DigestMismatch`] / [`FetchError::LengthMismatch`] when
    ///   the bytes are not the ones asked for
    /// - [`FetchError::AlreadyInProgress`] under [`Contention::FailFast`]
    /// - [`FetchError::Cancelled`] when the request's token fires
    pub async fn ensure_local(&self, request: &FetchRequest) -> Result<PathBuf> {
        request.validate()?;
        if request.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let lock = self.path_lock(&request.destination);
        let guard = match self.options.contention {
            Contention::Wait => tokio::select! {
                guard = lock.clone().lock_owned() => guard,
                _ = request.cancel.cancelled() => return Err(FetchError::Cancelled),
            },
            Contention::FailFast => {
                lock.clone()
                    .try_lock_owned()
                    .map_err(|_| FetchError::AlreadyInProgress {
                        path: request.destination.clone(),
                    })?
            }
        };

        let result = self.ensure_local_locked(request).await;

        drop(guard);
        self.release_path_lock(&request.destination, lock);
        result
    }

    /// Report what is on disk for `request` without touching the network.
    pub async fn inspect(&self, request: &FetchRequest) -> Result<ModelArtifact> {
        let partial_path = request.partial_path()?;

        let state = match file_len(&request.destination).await? {
            Some(bytes) if bytes > 0 => CompletionState::Complete { bytes },
            _ => match file_len(&partial_path).await? {
                Some(bytes) => CompletionState::Partial { bytes },
                None => CompletionState::Absent,
            },
        };
        let observed_len = match state {
            CompletionState::Absent => 0,
            CompletionState::Partial { bytes } | CompletionState::Complete { bytes } => bytes,
        };

        Ok(ModelArtifact {
            key: request.key.clone(),
            url: request.url.clone(),
            local_path: request.destination.clone(),
            partial_path,
            expected_len: request.expected_len,
            observed_len,
            state,
        })
    }

    async fn ensure_local_locked(&self, request: &FetchRequest) -> Result<PathBuf> {
        if let Some(bytes) = self.cached_len(request).await? {
            info!(path = %request.destination.display(), bytes, "artifact already local");
            request.emit(FetchEvent::Finished {
                bytes,
                cached: true,
            });
            return Ok(request.destination.clone());
        }

        info!(url = %request.url, path = %request.destination.display(), "fetching artifact");

        let mut attempt = 0;
        let bytes = loop {
            match self.transfer(request).await {
                Ok(bytes) => break bytes,
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    attempt += 1;
                    warn!(url = %request.url, attempt, error = %e, "transfer failed, will resume");
                    request.emit(FetchEvent::Retrying {
                        attempt,
                        error: e.to_string(),
                    });
                    let delay = self.options.retry_backoff * attempt;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = request.cancel.cancelled() => return Err(FetchError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        };

        self.finalize(request).await?;
        info!(path = %request.destination.display(), bytes, "artifact ready");
        request.emit(FetchEvent::Finished {
            bytes,
            cached: false,
        });
        Ok(request.destination.clone())
    }

    /// Length of a complete destination file, after optional integrity checks.
    async fn cached_len(&self, request: &FetchRequest) -> Result<Option<u64>> {
        let bytes = match file_len(&request.destination).await? {
            Some(bytes) if bytes > 0 => bytes,
            _ => return Ok(None),
        };

        if let Some(expected) = request.expected_len {
            if expected != bytes {
                return Err(FetchError::LengthMismatch {
                    path: request.destination.clone(),
                    expected,
                    actual: bytes,
                });
            }
        }
        if let Some(expected) = &request.expected_digest {
            verify_digest(&request.destination, expected).await?;
        }
        Ok(Some(bytes))
    }

    /// One transfer attempt into the partial file. Returns the partial's length.
    async fn transfer(&self, request: &FetchRequest) -> Result<u64> {
        let partial = request.partial_path()?;
        if let Some(parent) = partial.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FetchError::storage(parent, e))?;
            }
        }

        let mut offset = file_len(&partial).await?.unwrap_or(0);
        if let Some(expected) = request.expected_len {
            if offset == expected {
                debug!(path = %partial.display(), "partial already holds every byte");
                return Ok(offset);
            }
            if offset > expected {
                warn!(path = %partial.display(), offset, expected, "partial is longer than expected, discarding");
                offset = 0;
            }
        }

        let body = tokio::select! {
            body = self.source.open(&request.url, offset) => body?,
            _ = request.cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let resumed = body.offset > 0;
        if resumed && body.offset != offset {
            return Err(FetchError::fatal_transfer(
                &request.url,
                format!("source resumed at {} instead of {offset}", body.offset),
            ));
        }
        if offset > 0 && !resumed {
            debug!(url = %request.url, "source ignored the range, restarting from zero");
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(&partial)
            .await
            .map_err(|e| FetchError::storage(&partial, e))?;

        let total = body.total_len;
        let mut downloaded = body.offset;
        let mut last_reported = downloaded;
        request.emit(FetchEvent::Started {
            resumed_from: downloaded,
            total,
        });

        let mut stream = body.stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    file.flush().await.map_err(|e| FetchError::storage(&partial, e))?;
                    return Err(FetchError::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| FetchError::storage(&partial, e))?;
                    downloaded += chunk.len() as u64;
                    if downloaded - last_reported >= self.options.progress_step {
                        request.emit(FetchEvent::Progress { downloaded, total });
                        last_reported = downloaded;
                    }
                }
                Some(Err(e)) => {
                    // Keep what arrived so the next attempt can resume from it
                    file.flush().await.map_err(|e| FetchError::storage(&partial, e))?;
                    return Err(e);
                }
                None => break,
            }
        }

        file.flush().await.map_err(|e| FetchError::storage(&partial, e))?;
        file.sync_all().await.map_err(|e| FetchError::storage(&partial, e))?;
        request.emit(FetchEvent::Progress { downloaded, total });

        if let Some(total) = total {
            if downloaded < total {
                return Err(FetchError::transfer(
                    &request.url,
                    format!("stream ended after {downloaded} of {total} bytes"),
                ));
            }
        }
        if let Some(expected) = request.expected_len {
            if downloaded < expected {
                return Err(FetchError::transfer(
                    &request.url,
                    format!("stream ended after {downloaded} of {expected} bytes"),
                ));
            }
            if downloaded > expected {
                remove_if_present(&partial).await?;
                return Err(FetchError::LengthMismatch {
                    path: partial,
                    expected,
                    actual: downloaded,
                });
            }
        }
        Ok(downloaded)
    }

    /// Verify the partial and move it into place.
    async fn finalize(&self, request: &FetchRequest) -> Result<()> {
        let partial = request.partial_path()?;
        if let Some(expected) = &request.expected_digest {
            if let Err(e) = verify_digest(&partial, expected).await {
                if matches!(e, FetchError::DigestMismatch { .. }) {
                    remove_if_present(&partial).await?;
                }
                return Err(e);
            }
        }
        fs::rename(&partial, &request.destination)
            .await
            .map_err(|e| FetchError::storage(&request.destination, e))
    }

    fn path_lock(&self, destination: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let key = lock_key(destination);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(key).or_default())
    }

    fn release_path_lock(&self, destination: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let key = lock_key(destination);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Ours plus the map's: nobody else is waiting on this path
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(&key);
        }
    }
}

fn lock_key(destination: &Path) -> PathBuf {
    std::path::absolute(destination).unwrap_or_else(|_| destination.to_path_buf())
}

async fn file_len(path: &Path) -> Result<Option<u64>> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
        Ok(_) => Err(FetchError::storage(
            path,
            std::io::Error::other("path exists but is not a regular file"),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FetchError::storage(path, e)),
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FetchError::storage(path, e)),
    }
}

/// Hash `path` with blake3 on the blocking pool and compare against `expected`.
pub async fn verify_digest(path: &Path, expected: &str) -> Result<()> {
    let actual = file_digest(path).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(FetchError::DigestMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// blake3 digest (hex) of the file at `path`.
pub async fn file_digest(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::Read;
        let mut file = std::fs::File::open(&owned)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 1 << 20];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    })
    .await
    .map_err(|e| FetchError::storage(path, std::io::Error::other(e)))?
    .map_err(|e| FetchError::storage(path, e))
}
