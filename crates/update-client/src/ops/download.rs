//! Payload download.
//!
//! [`download_operation`] walks the advertised URLs in order, records one
//! download-metrics event per attempt, and verifies size and SHA-256 of
//! whatever it fetched. The transfer itself goes through a [`CrxDownloader`],
//! by default the streaming [`HttpDownloader`].

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{OperationSink, Payload};
use crate::config::NetworkConfig;
use crate::error::{CategorizedError, CrxDownloaderError, ErrorCategory};
use crate::telemetry::{make_event_download_metrics, DownloadMetrics, DownloaderKind};

/// Buffer size for reading chunks during hash computation.
const HASH_BUFFER_SIZE: usize = 8192;

/// Download progress callback, receives `(downloaded_bytes, total_bytes)`;
/// -1 means unknown.
pub type DownloadProgressCallback = Arc<dyn Fn(i64, i64) + Send + Sync>;

/// Fetches a single URL into a local file.
#[async_trait]
pub trait CrxDownloader: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    async fn download(
        &self,
        url: &Url,
        dest: &Path,
        progress: DownloadProgressCallback,
    ) -> Result<u64, CategorizedError>;

    fn kind(&self) -> DownloaderKind {
        DownloaderKind::Direct
    }
}

/// Streaming HTTP downloader.
pub struct HttpDownloader {
    /// HTTP client configured with timeouts.
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self::with_config(&NetworkConfig::default())
    }

    pub fn with_config(config: &NetworkConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .user_agent(&config.user_agent)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to configure HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrxDownloader for HttpDownloader {
    async fn download(
        &self,
        url: &Url,
        dest: &Path,
        progress: DownloadProgressCallback,
    ) -> Result<u64, CategorizedError> {
        debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| {
                warn!(%url, error = %e, "Request failed");
                CategorizedError::download(CrxDownloaderError::GenericError)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CategorizedError::download(i32::from(status.as_u16())));
        }

        let total = response
            .content_length()
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);
        let write_error = |e: std::io::Error| {
            warn!(path = ?dest, error = %e, "Failed to write download");
            CategorizedError::download(CrxDownloaderError::FileWriteError)
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(write_error)?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        progress(0, total);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                warn!(%url, error = %e, "Download interrupted");
                CategorizedError::download(CrxDownloaderError::GenericError)
            })?;
            file.write_all(&chunk).await.map_err(write_error)?;
            downloaded += chunk.len() as u64;
            progress(downloaded as i64, total);
        }

        file.sync_all().await.map_err(write_error)?;
        Ok(downloaded)
    }
}

/// Compute the SHA-256 hash of a file.
pub(crate) fn compute_file_hash(path: &Path) -> std::io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}

/// Verify `path` against a hex encoded SHA-256 digest.
async fn verify_hash(path: &Path, expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex.trim()) else {
        return false;
    };
    let path = path.to_path_buf();
    let actual = match tokio::task::spawn_blocking(move || compute_file_hash(&path)).await {
        Ok(Ok(hash)) => hash,
        _ => return false,
    };
    expected.len() == actual.len() && bool::from(actual.ct_eq(&expected[..]))
}

fn file_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("payload.crx")
        .to_string()
}

/// Download a payload from the first URL that yields a verified file.
///
/// The payload lives in a fresh directory under `work_dir`, removed when
/// the returned [`Payload`] is dropped.
pub async fn download_operation(
    downloader: Arc<dyn CrxDownloader>,
    urls: Vec<Url>,
    expected_size: i64,
    expected_hash: String,
    work_dir: PathBuf,
    sink: OperationSink,
) -> Result<Payload, CategorizedError> {
    if urls.is_empty() {
        return Err(CategorizedError::download(CrxDownloaderError::NoUrl));
    }
    if expected_hash.is_empty() {
        return Err(CategorizedError::download(CrxDownloaderError::NoHash));
    }

    let io_error = |e: std::io::Error| {
        warn!(error = %e, "Failed to prepare download directory");
        CategorizedError::download(CrxDownloaderError::FileWriteError)
    };
    tokio::fs::create_dir_all(&work_dir).await.map_err(io_error)?;
    let download_dir = tempfile::Builder::new()
        .prefix("download_")
        .tempdir_in(&work_dir)
        .map_err(io_error)?;

    let mut last_error = CategorizedError::download(CrxDownloaderError::GenericError);
    for url in urls {
        let dest = download_dir.path().join(file_name_for(&url));
        info!(%url, "Starting download");

        let started = Instant::now();
        let progress_sink = sink.clone();
        let progress: DownloadProgressCallback = Arc::new(move |downloaded, total| {
            progress_sink.download_progress(downloaded, total);
        });
        let result = downloader.download(&url, &dest, progress).await;

        let result = match result {
            Ok(bytes) => {
                let bytes = bytes as i64;
                if expected_size > 0 && bytes != expected_size {
                    warn!(%url, expected_size, bytes, "Download size mismatch");
                    Err((CategorizedError::download(CrxDownloaderError::BadSize), bytes))
                } else if !verify_hash(&dest, &expected_hash).await {
                    warn!(%url, "Download hash mismatch");
                    Err((CategorizedError::download(CrxDownloaderError::BadHash), bytes))
                } else {
                    Ok(bytes)
                }
            }
            Err(e) => Err((e, -1)),
        };

        let (error, downloaded_bytes) = match &result {
            Ok(bytes) => (0, *bytes),
            Err((e, bytes)) => (e.code, *bytes),
        };
        sink.event(make_event_download_metrics(&DownloadMetrics {
            url: url.to_string(),
            downloader: downloader.kind(),
            error,
            extra_code1: 0,
            downloaded_bytes,
            total_bytes: expected_size,
            download_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }));

        match result {
            Ok(bytes) => {
                info!(%url, bytes, "Download complete");
                return Ok(Payload::in_scratch(dest, download_dir));
            }
            Err((e, _)) => {
                if let Err(remove_error) = tokio::fs::remove_file(&dest).await {
                    if remove_error.kind() != std::io::ErrorKind::NotFound {
                        warn!(%url, error = %remove_error, "Failed to remove rejected download");
                    }
                }
                last_error = e;
            }
        }
    }

    if let Err(e) = download_dir.close() {
        warn!(error = %e, "Failed to remove download directory");
    }
    debug_assert_ne!(last_error.category, ErrorCategory::None);
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Operation, OperationMessage};
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves canned bodies per URL; URLs without a body fail with 404.
    struct MapDownloader {
        bodies: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl CrxDownloader for MapDownloader {
        async fn download(
            &self,
            url: &Url,
            dest: &Path,
            progress: DownloadProgressCallback,
        ) -> Result<u64, CategorizedError> {
            let Some(body) = self.bodies.get(url.as_str()) else {
                return Err(CategorizedError::download(404));
            };
            progress(0, body.len() as i64);
            std::fs::write(dest, body).unwrap();
            progress(body.len() as i64, body.len() as i64);
            Ok(body.len() as u64)
        }
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_empty_url_list() {
        let temp = TempDir::new().unwrap();
        let downloader = Arc::new(MapDownloader { bodies: HashMap::new() });
        let err = download_operation(
            downloader,
            vec![],
            1,
            "aa".into(),
            temp.path().to_path_buf(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, CrxDownloaderError::NoUrl.code());
    }

    #[tokio::test]
    async fn test_rejects_missing_hash() {
        let temp = TempDir::new().unwrap();
        let downloader = Arc::new(MapDownloader { bodies: HashMap::new() });
        let err = download_operation(
            downloader,
            vec![url("https://a.example/x.crx")],
            1,
            String::new(),
            temp.path().to_path_buf(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, CrxDownloaderError::NoHash.code());
    }

    #[tokio::test]
    async fn test_falls_through_to_next_url() {
        let temp = TempDir::new().unwrap();
        let body = b"payload".to_vec();
        let hash = sha256_hex(&body);
        let mut bodies = HashMap::new();
        bodies.insert("https://b.example/x.crx".to_string(), body.clone());
        let downloader = Arc::new(MapDownloader { bodies });

        let work_dir = temp.path().to_path_buf();
        let op = Operation::spawn(move |sink| {
            download_operation(
                downloader,
                vec![url("https://a.example/x.crx"), url("https://b.example/x.crx")],
                body.len() as i64,
                hash,
                work_dir,
                sink,
            )
        });

        let mut events = Vec::new();
        let mut progress = 0;
        let payload = op
            .drive(|m| match m {
                OperationMessage::Event(e) => events.push(e),
                OperationMessage::DownloadProgress { .. } => progress += 1,
                OperationMessage::InstallProgress(_) => {}
            })
            .await
            .unwrap()
            .unwrap();

        let path = payload.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert_eq!(path.file_name().unwrap(), "x.crx");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["errorcode"], 404);
        assert_eq!(events[1]["eventresult"], 1);
        assert!(events.iter().all(|e| e["download_time_ms"].is_u64()));
        assert_eq!(progress, 2);

        let dir = path.parent().unwrap().to_path_buf();
        drop(payload);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let downloader = Arc::new(MapDownloader { bodies: HashMap::new() });
        let work_dir = temp.path().join("work");

        download_operation(
            downloader,
            vec![url("https://a.example/x.crx")],
            1,
            "aa".into(),
            work_dir.clone(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();

        assert_eq!(std::fs::read_dir(&work_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_bad_hash() {
        let temp = TempDir::new().unwrap();
        let mut bodies = HashMap::new();
        bodies.insert("https://a.example/x.crx".to_string(), b"payload".to_vec());
        let downloader = Arc::new(MapDownloader { bodies });

        let err = download_operation(
            downloader,
            vec![url("https://a.example/x.crx")],
            7,
            sha256_hex(b"something else"),
            temp.path().to_path_buf(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Download);
        assert_eq!(err.code, CrxDownloaderError::BadHash.code());
    }

    #[tokio::test]
    async fn test_bad_size() {
        let temp = TempDir::new().unwrap();
        let body = b"payload".to_vec();
        let mut bodies = HashMap::new();
        bodies.insert("https://a.example/x.crx".to_string(), body.clone());
        let downloader = Arc::new(MapDownloader { bodies });

        let err = download_operation(
            downloader,
            vec![url("https://a.example/x.crx")],
            100,
            sha256_hex(&body),
            temp.path().to_path_buf(),
            OperationSink::detached(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, CrxDownloaderError::BadSize.code());
    }

    #[test]
    fn test_file_name_for() {
        assert_eq!(file_name_for(&url("https://a.example/dir/x_1.crx")), "x_1.crx");
        assert_eq!(file_name_for(&url("https://a.example/")), "payload.crx");
    }

    #[test]
    fn test_compute_file_hash() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        let hash = compute_file_hash(&path).unwrap();
        assert_eq!(
            hex::encode(hash),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
