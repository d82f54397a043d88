//! Download worker: the fetch/compare/inflate/install state machine for
//! one (channel, attempt) pair.
//!
//! States S0-S7 follow spec.md §4.2, grounded in
//! `original_source/downloader.py::Downloader._download`/`download`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::dispatch::{now, ConcurrencyGate};
use crate::types::{DownloadResult, RequestDetails, ResponseDetails};

/// Total wall-clock timeout for the upstream fetch (spec.md §4.2 S1).
const FETCH_TIMEOUT: Duration = Duration::from_secs(300);
/// Copy buffer size for streaming to disk and for inflate (spec.md §4.2 S2/S4).
const CHUNK_SIZE: usize = 16 * 1024 * 1024;
/// Above this gate-wait duration, log it (spec.md §4.2 S0).
const SLOW_GATE_WAIT: Duration = Duration::from_secs(1);

/// Execute one download attempt for `channel` and post exactly one
/// [`DownloadResult`] to `inbox`. Never panics on a failed fetch or
/// install; all failures are captured in `result.exception`.
pub async fn run(
    channel: String,
    inbox: oneshot::Sender<DownloadResult>,
    gate: Arc<ConcurrencyGate>,
    client: reqwest::Client,
    upstream_url: String,
    local_root: PathBuf,
) {
    let mut result = DownloadResult::started(now());

    // S0: wait for the gate.
    let wait_start = std::time::Instant::now();
    let (permit, was_saturated) = gate.acquire().await;
    result.download_lock_acquired = Some(now());
    let waited = wait_start.elapsed();

    if was_saturated {
        warn!(limit = gate.limit(), "limit reached: concurrent downloads saturated");
    }
    if waited > SLOW_GATE_WAIT {
        warn!(seconds = waited.as_secs(), "waited to acquire download lock");
    }

    let outcome = fetch_compare_inflate_install(&channel, &client, &upstream_url, &local_root, &mut result).await;
    if let Err(e) = outcome {
        warn!(channel = %channel, error = %e, "exception seen during download");
        result.exception = Some(e.to_string());
    }

    drop(permit);
    gate.release();
    result.completed = Some(now());
    debug!(channel = %channel, inflight = gate.in_use(), "download attempt finished");

    // A stale post into an abandoned receiver (scheduler already timed
    // out) is silently dropped, matching the single-slot inbox semantics
    // in spec.md §9.
    let _ = inbox.send(result);
}

async fn fetch_compare_inflate_install(
    channel: &str,
    client: &reqwest::Client,
    upstream_url: &str,
    local_root: &Path,
    result: &mut DownloadResult,
) -> crate::error::Result<()> {
    let channel_dir = local_root.join(channel);
    let new_download = channel_dir.join("channeldata.json.gz.new");
    let compressed = channel_dir.join("channeldata.json.gz");
    let channeldata = channel_dir.join("channeldata.json");
    let inflated = channel_dir.join("channeldata.json.inflated");

    let base = url::Url::parse(upstream_url).map_err(|e| crate::error::Error::Config {
        message: format!("invalid upstream url {upstream_url}: {e}"),
    })?;
    let url = base
        .join(&format!("{}/channeldata.json", channel))
        .map_err(|e| crate::error::Error::Config {
            message: format!("could not build request url for {channel}: {e}"),
        })?;

    // S1: fetch.
    let request = client
        .get(url.clone())
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(crate::error::Error::Network)?;
    let request_info = RequestDetails {
        method: request.method().to_string(),
        url: request.url().to_string(),
        headers: headers_to_map(request.headers()),
    };

    let fetch_start = std::time::Instant::now();
    let response = client
        .execute(request)
        .await
        .map_err(crate::error::Error::Network)?;
    let status = response.status();
    result.download = Some(response_details(&response, request_info, fetch_start.elapsed()));

    if !status.is_success() {
        return Err(crate::error::Error::BadStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    // S2: stream to temp, creating the channel directory if needed.
    tokio::fs::create_dir_all(&channel_dir).await?;
    stream_to_file(response, &new_download).await?;

    // S3: equality check against the stored compressed baseline.
    if channeldata.exists() && compressed.exists() && files_equal(&compressed, &new_download).await? {
        tokio::fs::remove_file(&new_download).await?;
        return Ok(());
    }

    // S4: inflate.
    result.inflate_start = Some(now());
    inflate(&new_download, &inflated).await?;
    result.inflate_complete = Some(now());

    // S5: install. Rename the inflated document over channeldata.json,
    // then replace the compressed baseline so S3 can short-circuit on the
    // next attempt (spec.md §4.2/§9 open question, resolved: do replace it).
    tokio::fs::rename(&inflated, &channeldata).await?;
    tokio::fs::rename(&new_download, &compressed).await?;
    result.updated = Some(now());
    result.filename = Some(channeldata.display().to_string());

    Ok(())
}

async fn stream_to_file(response: reqwest::Response, dest: &Path) -> crate::error::Result<()> {
    let mut file = tokio::io::BufWriter::new(tokio::fs::File::create(dest).await?);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(crate::error::Error::Network)?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn files_equal(a: &Path, b: &Path) -> crate::error::Result<bool> {
    let mut fa = tokio::fs::File::open(a).await?;
    let mut fb = tokio::fs::File::open(b).await?;
    if fa.metadata().await?.len() != fb.metadata().await?.len() {
        return Ok(false);
    }

    let mut buf_a = vec![0u8; CHUNK_SIZE.min(1 << 20)];
    let mut buf_b = vec![0u8; CHUNK_SIZE.min(1 << 20)];
    loop {
        let n = fa.read(&mut buf_a).await?;
        if n == 0 {
            return Ok(true);
        }
        fb.read_exact(&mut buf_b[..n]).await?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

async fn inflate(src: &Path, dest: &Path) -> crate::error::Result<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> crate::error::Result<()> {
        let input = std::fs::File::open(&src)?;
        let mut decoder = flate2::read::GzDecoder::new(std::io::BufReader::new(input));
        let mut output = std::io::BufWriter::new(std::fs::File::create(&dest)?);
        std::io::copy(&mut decoder, &mut output).map_err(crate::error::Error::Inflate)?;
        Ok(())
    })
    .await
    .expect("inflate task panicked")
}

fn response_details(
    response: &reqwest::Response,
    request: RequestDetails,
    elapsed: Duration,
) -> ResponseDetails {
    ResponseDetails {
        status_code: response.status().as_u16(),
        headers: headers_to_map(response.headers()),
        url: response.url().to_string(),
        reason: response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string(),
        elapsed,
        encoding: response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        request,
    }
}

fn headers_to_map(headers: &reqwest::header::HeaderMap) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    async fn run_once(mock_server: &MockServer, local_root: &Path, channel: &str) -> DownloadResult {
        let client = reqwest::Client::new();
        let gate = ConcurrencyGate::new(4);
        let (tx, rx) = oneshot::channel();
        run(
            channel.to_string(),
            tx,
            gate,
            client,
            mock_server.uri(),
            local_root.to_path_buf(),
        )
        .await;
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn first_fetch_installs_and_seeds_compressed_baseline() {
        let mock_server = MockServer::start().await;
        let body = gzip(br#"{"packages": {}}"#);
        Mock::given(method("GET"))
            .and(path("/demo/channeldata.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&mock_server)
            .await;

        let local_root = tempfile::tempdir().unwrap();
        let result = run_once(&mock_server, local_root.path(), "demo").await;

        assert!(result.exception.is_none());
        assert!(result.is_update());
        assert_eq!(
            std::fs::read_to_string(local_root.path().join("demo/channeldata.json")).unwrap(),
            r#"{"packages": {}}"#
        );
        assert!(local_root.path().join("demo/channeldata.json.gz").exists());
        assert!(!local_root.path().join("demo/channeldata.json.gz.new").exists());
    }

    #[tokio::test]
    async fn unchanged_upstream_short_circuits_without_inflate() {
        let mock_server = MockServer::start().await;
        let body = gzip(br#"{"packages": {}}"#);
        Mock::given(method("GET"))
            .and(path("/demo/channeldata.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&mock_server)
            .await;

        let local_root = tempfile::tempdir().unwrap();
        let first = run_once(&mock_server, local_root.path(), "demo").await;
        assert!(first.is_update());

        let second = run_once(&mock_server, local_root.path(), "demo").await;
        assert!(second.exception.is_none());
        assert!(!second.is_update());
        assert!(second.updated.is_none());
        assert!(second.inflate_start.is_none());
        assert!(second.inflate_complete.is_none());
        assert!(!local_root.path().join("demo/channeldata.json.gz.new").exists());
    }

    #[tokio::test]
    async fn upstream_flip_produces_exactly_one_update() {
        let mock_server = MockServer::start().await;
        let body_a = gzip(br#"{"packages": {"a": 1}}"#);
        Mock::given(method("GET"))
            .and(path("/demo/channeldata.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body_a))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        let body_b = gzip(br#"{"packages": {"b": 2}}"#);
        Mock::given(method("GET"))
            .and(path("/demo/channeldata.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body_b))
            .mount(&mock_server)
            .await;

        let local_root = tempfile::tempdir().unwrap();
        let first = run_once(&mock_server, local_root.path(), "demo").await;
        assert!(first.is_update());
        let second = run_once(&mock_server, local_root.path(), "demo").await;
        assert!(!second.is_update(), "same body as first fetch should short-circuit");
        let third = run_once(&mock_server, local_root.path(), "demo").await;
        assert!(third.is_update(), "flipped body should produce an update");

        assert_eq!(
            std::fs::read_to_string(local_root.path().join("demo/channeldata.json")).unwrap(),
            r#"{"packages": {"b": 2}}"#
        );
    }

    #[tokio::test]
    async fn non_2xx_status_is_recorded_as_exception() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/demo/channeldata.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let local_root = tempfile::tempdir().unwrap();
        let result = run_once(&mock_server, local_root.path(), "demo").await;

        assert!(result.exception.is_some());
        assert!(result.updated.is_none());
        assert!(!local_root.path().join("demo/channeldata.json").exists());
    }
}
