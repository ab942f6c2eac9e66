//! End-to-end transfers against a local HTTP server that honours `Range`.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use bytes::Bytes;
use pocketrag_fetch::{
    ArtifactCache, CacheOptions, CompletionState, FetchError, FetchRequest, HttpSource,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

struct Served {
    data: Vec<u8>,
    requests: AtomicUsize,
    ranges: Mutex<Vec<Option<String>>>,
    /// Abort the first response after this many body bytes
    cut_first_at: Option<usize>,
}

impl Served {
    fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data,
            requests: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
            cut_first_at: None,
        })
    }

    fn cutting_first_response_at(data: Vec<u8>, cut: usize) -> Arc<Self> {
        Arc::new(Self {
            data,
            requests: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
            cut_first_at: Some(cut),
        })
    }
}

async fn serve_model(State(served): State<Arc<Served>>, headers: HeaderMap) -> Response {
    let nth = served.requests.fetch_add(1, Ordering::SeqCst);
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    served.ranges.lock().unwrap().push(range.clone());

    let len = served.data.len();
    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|r| r.parse::<usize>().ok())
        .unwrap_or(0);

    if start >= len && start > 0 {
        return Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{len}"))
            .body(Body::empty())
            .unwrap();
    }

    let builder = if start > 0 {
        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{}/{len}", len - 1),
            )
    } else {
        Response::builder().status(StatusCode::OK)
    }
    .header(header::CONTENT_LENGTH, len - start);

    let body = Bytes::copy_from_slice(&served.data[start..]);
    if nth == 0 {
        if let Some(cut) = served.cut_first_at {
            let chunks = vec![
                Ok(body.slice(..cut)),
                Err(std::io::Error::other("simulated connection drop")),
            ];
            return builder
                .body(Body::from_stream(futures::stream::iter(chunks)))
                .unwrap();
        }
    }
    builder.body(Body::from(body)).unwrap()
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn spawn_server(served: Arc<Served>) -> String {
    let app = Router::new()
        .route("/model.bin", get(serve_model))
        .route("/missing.bin", get(missing))
        .with_state(served);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn cache() -> ArtifactCache<HttpSource> {
    let source = HttpSource::new("pocketrag-test", Duration::from_secs(5)).unwrap();
    ArtifactCache::new(
        source,
        CacheOptions::default().with_retry_backoff(Duration::from_millis(10)),
    )
}

#[tokio::test]
async fn downloads_in_one_pass() -> anyhow::Result<()> {
    let data = payload(64 * 1024);
    let served = Served::new(data.clone());
    let base = spawn_server(served.clone()).await;
    let dir = tempdir()?;
    let dest = dir.path().join("model.bin");

    let path = cache()
        .ensure_local(&FetchRequest::new(format!("{base}/model.bin"), &dest))
        .await?;

    assert_eq!(std::fs::read(path)?, data);
    assert_eq!(served.requests.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn resumes_from_existing_partial_with_range_request() -> anyhow::Result<()> {
    let data = payload(40_000);
    let served = Served::new(data.clone());
    let base = spawn_server(served.clone()).await;
    let dir = tempdir()?;
    let request = FetchRequest::new(format!("{base}/model.bin"), dir.path().join("model.bin"));

    // An earlier run stopped after 12_345 bytes
    std::fs::write(request.partial_path()?, &data[..12_345])?;
    let cache = cache();
    assert_eq!(
        cache.inspect(&request).await?.state,
        CompletionState::Partial { bytes: 12_345 }
    );

    cache.ensure_local(&request).await?;

    assert_eq!(std::fs::read(&request.destination)?, data);
    assert_eq!(
        *served.ranges.lock().unwrap(),
        vec![Some("bytes=12345-".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn dropped_connection_is_resumed_to_identical_bytes() -> anyhow::Result<()> {
    let data = payload(100_000);
    let served = Served::cutting_first_response_at(data.clone(), 30_000);
    let base = spawn_server(served.clone()).await;
    let dir = tempdir()?;
    let dest = dir.path().join("model.bin");

    cache()
        .ensure_local(&FetchRequest::new(format!("{base}/model.bin"), &dest))
        .await?;

    assert_eq!(std::fs::read(&dest)?, data);
    assert_eq!(served.requests.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn full_partial_is_published_without_body() -> anyhow::Result<()> {
    let data = payload(5_000);
    let served = Served::new(data.clone());
    let base = spawn_server(served.clone()).await;
    let dir = tempdir()?;
    let request = FetchRequest::new(format!("{base}/model.bin"), dir.path().join("model.bin"));
    std::fs::write(request.partial_path()?, &data)?;

    cache().ensure_local(&request).await?;

    assert_eq!(std::fs::read(&request.destination)?, data);
    assert!(!request.partial_path()?.exists());
    Ok(())
}

#[tokio::test]
async fn missing_artifact_fails_without_retry() -> anyhow::Result<()> {
    let served = Served::new(payload(10));
    let base = spawn_server(served).await;
    let dir = tempdir()?;

    let err = cache()
        .ensure_local(&FetchRequest::new(
            format!("{base}/missing.bin"),
            dir.path().join("missing.bin"),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Transfer { retryable: false, .. }));
    assert!(!dir.path().join("missing.bin").exists());
    Ok(())
}
