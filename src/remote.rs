// Remote access module for listing pages, lookups and artifact downloads
use crate::constants;
use crate::descriptor::{self, Scheme};
use crate::error::{BisectError, Result};
use crate::gsutil::{FailureMode, Gsutil};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Byte counters shared between a download worker and whoever reports progress.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    received: AtomicU64,
    total: AtomicU64,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_received(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_total(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Undo the counts of an attempt that is about to be retried.
    pub fn rollback(&self, received: u64, total: u64) {
        self.received.fetch_sub(received, Ordering::Relaxed);
        self.total.fetch_sub(total, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Total size, when every transfer announced one.
    pub fn total(&self) -> Option<u64> {
        match self.total.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }
}

/// Network access used by the backends and download jobs.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` as text; 404/403 map to `ArtifactMissing`.
    async fn get_text(&self, url: &str) -> Result<String>;

    /// `gsutil ls -l` style listing of one or more gs:// URLs.
    async fn gs_list(&self, urls: &[String], ignore_fail: bool) -> Result<Vec<String>>;

    /// Fetches `url` into the existing file `dest`, returning the byte count.
    async fn download(&self, url: &str, dest: &Path, progress: &DownloadProgress) -> Result<u64>;
}

/// reqwest for http(s), gsutil for gs://.
pub struct LiveFetcher {
    client: reqwest::Client,
    download_client: reqwest::Client,
    gsutil: Option<Gsutil>,
}

impl LiveFetcher {
    pub fn new(gsutil: Option<Gsutil>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(constants::HTTP_TIMEOUT_SECS))
            .user_agent(constants::user_agent())
            .build()?;
        // Archives can take far longer than a listing page.
        let download_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(constants::HTTP_CONNECT_TIMEOUT_SECS))
            .user_agent(constants::user_agent())
            .build()?;
        Ok(Self {
            client,
            download_client,
            gsutil,
        })
    }

    fn gsutil(&self) -> Result<&Gsutil> {
        self.gsutil.as_ref().ok_or_else(|| {
            BisectError::CliUsage(
                "gsutil is not found in PATH. Install depot_tools \
                 (http://dev.chromium.org/developers/how-tos/install-depot-tools) and try again."
                    .to_string(),
            )
        })
    }

    async fn http_download(&self, url: &str, dest: &Path, progress: &DownloadProgress) -> Result<u64> {
        let response = self.download_client.get(url).send().await?;
        check_status(response.status(), url)?;

        let total = response.content_length().unwrap_or(0);
        progress.add_total(total);

        // The job created `dest`; never recreate it after a stop unlinked it.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(dest)
            .await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        let transfer: Result<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
                progress.add_received(chunk.len() as u64);
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = transfer {
            progress.rollback(written, total);
            return Err(e);
        }
        Ok(written)
    }
}

#[async_trait]
impl Fetcher for LiveFetcher {
    async fn get_text(&self, url: &str) -> Result<String> {
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BisectError::BackendUnavailable(format!("GET {} failed: {}", url, e)))?;
        check_status(response.status(), url)?;
        Ok(response.text().await?)
    }

    async fn gs_list(&self, urls: &[String], ignore_fail: bool) -> Result<Vec<String>> {
        let mode = if ignore_fail {
            FailureMode::IgnoreFail
        } else {
            FailureMode::Strict
        };
        self.gsutil()?.list(urls, mode).await
    }

    async fn download(&self, url: &str, dest: &Path, progress: &DownloadProgress) -> Result<u64> {
        match descriptor::scheme_of(url)? {
            Scheme::Gs => {
                self.gsutil()?.copy(url, dest).await?;
                let size = tokio::fs::metadata(dest).await?.len();
                progress.add_total(size);
                progress.add_received(size);
                Ok(size)
            }
            Scheme::Http | Scheme::Https => self.http_download(url, dest, progress).await,
        }
    }
}

/// 404 and 403 mean the object is not there (or not ours to read); any
/// other failure status is worth retrying.
fn check_status(status: reqwest::StatusCode, url: &str) -> Result<()> {
    match status {
        reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::FORBIDDEN => {
            Err(BisectError::ArtifactMissing(url.to_string()))
        }
        s if s.is_success() => Ok(()),
        s => Err(BisectError::BackendUnavailable(format!(
            "Unexpected status code: {} for {}",
            s, url
        ))),
    }
}

/// Whether tests should talk to the real services.
pub fn live_services_enabled() -> bool {
    std::env::var_os(constants::NO_MOCK_SERVER_ENV).is_some()
}
