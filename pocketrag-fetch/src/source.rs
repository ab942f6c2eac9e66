//! Remote artifact sources
//!
//! The cache talks to the network through [`RemoteSource`], which opens a byte
//! stream at a requested offset. [`HttpSource`] implements it over HTTP(S)
//! with `Range` requests; tests plug in scripted sources.

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap, RANGE};
use std::time::Duration;

/// Stream of body chunks from a remote source.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// An opened remote body.
pub struct RemoteBody {
    /// Total size of the resource, when the remote reports it
    pub total_len: Option<u64>,
    /// Offset of the first byte in `stream`. Equals the requested offset when
    /// the range was honoured, `0` when the remote sent the whole resource.
    pub offset: u64,
    pub stream: ByteStream,
}

impl RemoteBody {
    /// A body with nothing left to send: the partial already holds every byte.
    pub fn exhausted(total_len: u64) -> Self {
        Self {
            total_len: Some(total_len),
            offset: total_len,
            stream: futures::stream::empty().boxed(),
        }
    }
}

/// Something that can serve an artifact's bytes starting at an offset.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Open `url` for reading from byte `offset` onwards.
    async fn open(&self, url: &str, offset: u64) -> Result<RemoteBody>;
}

/// HTTP(S) source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Build a source with the given user agent and connect timeout.
    ///
    /// No overall request timeout is set: model artifacts run to gigabytes and
    /// a total deadline would cut healthy transfers short.
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| FetchError::invalid_request(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { client })
    }

    async fn request(&self, url: &str, offset: u64) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        request
            .send()
            .await
            .map_err(|e| FetchError::transfer(url, e.to_string()))
    }

    fn into_body(url: &str, response: reqwest::Response, offset: u64) -> RemoteBody {
        let total_len = match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                content_range(response.headers()).and_then(|(_, total)| total)
            }
            _ => response.content_length(),
        };
        let url = url.to_string();
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::transfer(url.as_str(), e.to_string())))
            .boxed();
        RemoteBody {
            total_len,
            offset,
            stream,
        }
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn open(&self, url: &str, offset: u64) -> Result<RemoteBody> {
        let response = self.request(url, offset).await?;
        let status = response.status();
        tracing::debug!(url, offset, status = status.as_u16(), "remote responded");

        match status {
            StatusCode::PARTIAL_CONTENT => {
                let start = content_range(response.headers()).and_then(|(start, _)| start);
                if start != Some(offset) {
                    return Err(FetchError::fatal_transfer(
                        url,
                        format!("asked for bytes from {offset}, server answered from {start:?}"),
                    ));
                }
                Ok(Self::into_body(url, response, offset))
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                let total = content_range(response.headers()).and_then(|(_, total)| total);
                if total == Some(offset) {
                    return Ok(RemoteBody::exhausted(offset));
                }
                // The partial no longer lines up with the remote; start over
                tracing::warn!(url, offset, ?total, "partial does not match remote, restarting");
                let response = self.request(url, 0).await?;
                if !response.status().is_success() {
                    return Err(status_error(url, response.status()));
                }
                Ok(Self::into_body(url, response, 0))
            }
            s if s.is_success() => Ok(Self::into_body(url, response, 0)),
            s => Err(status_error(url, s)),
        }
    }
}

fn status_error(url: &str, status: StatusCode) -> FetchError {
    let message = format!("server answered {status}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        FetchError::transfer(url, message)
    } else {
        FetchError::fatal_transfer(url, message)
    }
}

/// Parse `Content-Range: bytes <start>-<end>/<total>` into `(start, total)`.
///
/// Either side may be `*` (as in `bytes */1234` on a 416 answer).
fn content_range(headers: &HeaderMap) -> Option<(Option<u64>, Option<u64>)> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range(value)
}

fn parse_content_range(value: &str) -> Option<(Option<u64>, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    let start = match range.trim() {
        "*" => None,
        r => Some(r.split_once('-')?.0.trim().parse().ok()?),
    };
    Some((start, total))
}
