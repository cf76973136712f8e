// Background download of one revision's artifacts into temp files
//
// A job owns the temp files it creates from the moment `start` runs until
// `stop` (or drop) unlinks them, whatever state the transfer is in.

use crate::constants;
use crate::descriptor::{DownloadDescriptor, FetchedArtifacts, Role};
use crate::error::{BisectError, Result};
use crate::logger::BisectLogger;
use crate::remote::{DownloadProgress, Fetcher};
use crate::retry::RetryPolicy;
use crate::revision::Revision;
use futures_util::future::try_join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    New,
    Running,
    Done,
    Disposed,
}

type FetchOutcome = Result<(FetchedArtifacts, u64)>;

/// Failure kept so repeated `wait_for` calls report the same error.
#[derive(Debug, Clone)]
enum Failure {
    Missing(String),
    Cancelled,
    Other(String),
}

pub struct DownloadJob {
    revision: Revision,
    descriptor: DownloadDescriptor,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    temp_root: PathBuf,
    state: JobState,
    files: Vec<PathBuf>,
    token: CancellationToken,
    handle: Option<JoinHandle<FetchOutcome>>,
    result: Option<FetchedArtifacts>,
    failure: Option<Failure>,
    progress: Arc<DownloadProgress>,
}

impl DownloadJob {
    pub fn new(
        revision: Revision,
        descriptor: DownloadDescriptor,
        fetcher: Arc<dyn Fetcher>,
        retry: RetryPolicy,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            revision,
            descriptor,
            fetcher,
            retry,
            temp_root: temp_root.into(),
            state: JobState::New,
            files: Vec::new(),
            token: CancellationToken::new(),
            handle: None,
            result: None,
            failure: None,
            progress: Arc::new(DownloadProgress::new()),
        }
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn descriptor(&self) -> &DownloadDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Temp files created so far.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn progress(&self) -> &DownloadProgress {
        &self.progress
    }

    /// Creates the temp files and spawns the transfer. Must run inside a
    /// tokio runtime. A job already started is left alone.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            JobState::New => {}
            JobState::Running | JobState::Done => return Ok(()),
            JobState::Disposed => {
                return Err(BisectError::InternalInvariantViolation(format!(
                    "download of {} restarted after stop",
                    self.revision
                )));
            }
        }

        let mut entries: Vec<(Option<Role>, String, PathBuf)> = Vec::new();
        for (role, url) in self.descriptor.entries() {
            let path = self.create_temp_file(url)?;
            self.files.push(path.clone());
            entries.push((role, url.to_string(), path));
        }
        log::debug!("Starting download of {} into {:?}", self.revision, self.files);

        let transfer = fetch_all(entries, self.fetcher.clone(), self.retry, self.progress.clone());
        let token = self.token.clone();
        let revision = self.revision.to_string();
        self.handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => Err(BisectError::Cancelled(revision)),
                outcome = transfer => outcome,
            }
        }));
        self.state = JobState::Running;
        Ok(())
    }

    /// The basename of the URL is kept so a leftover file is recognizable
    /// (and so installers that check extensions accept it).
    fn create_temp_file(&self, url: &str) -> Result<PathBuf> {
        let basename = url::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "artifact".to_string());
        std::fs::create_dir_all(&self.temp_root)?;
        let file = tempfile::Builder::new()
            .prefix(constants::TEMP_FILE_PREFIX)
            .suffix(&format!("-{}", basename))
            .tempfile_in(&self.temp_root)?;
        file.into_temp_path().keep().map_err(|e| BisectError::Io(e.error))
    }

    /// Waits for the transfer, reporting progress to `logger`. Starts the
    /// job if needed. Calling it again after completion returns the same
    /// artifacts (or the same failure).
    pub async fn wait_for(&mut self, logger: &dyn BisectLogger) -> Result<FetchedArtifacts> {
        match self.state {
            JobState::New => self.start()?,
            JobState::Running => {}
            JobState::Done => return self.finished(),
            JobState::Disposed => return Err(BisectError::Cancelled(self.revision.to_string())),
        }

        logger.on_download_start(&self.revision);
        let joined = {
            let handle = self.handle.as_mut().ok_or_else(|| {
                BisectError::InternalInvariantViolation("running download without a task".into())
            })?;
            let mut ticker = tokio::time::interval(Duration::from_millis(constants::PROGRESS_POLL_INTERVAL_MS));
            loop {
                tokio::select! {
                    joined = &mut *handle => break joined,
                    _ = ticker.tick() => {
                        logger.on_download_progress(&self.revision, self.progress.received(), self.progress.total());
                    }
                }
            }
        };
        self.handle = None;
        self.state = JobState::Done;

        match joined {
            Ok(Ok((artifacts, bytes))) => {
                logger.on_download_done(&self.revision, bytes);
                self.result = Some(artifacts);
            }
            Ok(Err(e)) => {
                self.failure = Some(match &e {
                    BisectError::ArtifactMissing(url) => Failure::Missing(url.clone()),
                    BisectError::Cancelled(_) => Failure::Cancelled,
                    other => Failure::Other(other.to_string()),
                });
                return Err(e);
            }
            Err(join_error) => {
                let failure = if join_error.is_cancelled() {
                    Failure::Cancelled
                } else {
                    Failure::Other(format!("download task failed: {}", join_error))
                };
                self.failure = Some(failure);
                return self.finished();
            }
        }
        self.finished()
    }

    fn finished(&self) -> Result<FetchedArtifacts> {
        if let Some(artifacts) = &self.result {
            return Ok(artifacts.clone());
        }
        Err(match &self.failure {
            Some(Failure::Missing(url)) => BisectError::ArtifactMissing(url.clone()),
            Some(Failure::Other(message)) => BisectError::BackendUnavailable(message.clone()),
            Some(Failure::Cancelled) | None => BisectError::Cancelled(self.revision.to_string()),
        })
    }

    /// Cancels the transfer, waits for the worker to exit and unlinks every
    /// temp file. Safe in any state.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.remove_files();
        self.result = None;
        self.state = JobState::Disposed;
    }

    fn remove_files(&mut self) {
        for path in self.files.drain(..) {
            remove_file(&path);
        }
    }
}

/// Fetches every entry concurrently, each with its own retry budget.
async fn fetch_all(
    entries: Vec<(Option<Role>, String, PathBuf)>,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    progress: Arc<DownloadProgress>,
) -> FetchOutcome {
    let fetches = entries.into_iter().map(|(role, url, path)| {
        let fetcher = fetcher.clone();
        let progress = progress.clone();
        async move {
            let what = format!("download of {}", url);
            let bytes = retry
                .run(&what, || fetcher.download(&url, &path, &progress))
                .await?;
            Ok::<_, BisectError>((role, path, bytes))
        }
    });
    let fetched = try_join_all(fetches).await?;
    let total = fetched.iter().map(|(_, _, bytes)| *bytes).sum();

    let mut single = None;
    let mut map = BTreeMap::new();
    for (role, path, _) in fetched {
        match role {
            Some(role) => {
                map.insert(role, path);
            }
            None => single = Some(path),
        }
    }
    let artifacts = match single {
        Some(path) if map.is_empty() => FetchedArtifacts::Single(path),
        None if !map.is_empty() => FetchedArtifacts::Multi(map),
        _ => {
            return Err(BisectError::InternalInvariantViolation(
                "download mixes labeled and unlabeled artifacts".into(),
            ));
        }
    };
    Ok((artifacts, total))
}

fn remove_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.remove_files();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::SilentLogger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Writes the URL into the destination, or blocks forever for "slow" URLs.
    #[derive(Default)]
    struct EchoFetcher {
        calls: AtomicU32,
        fail_first: bool,
    }

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn get_text(&self, url: &str) -> Result<String> {
            Err(BisectError::ArtifactMissing(url.to_string()))
        }

        async fn gs_list(&self, _urls: &[String], _ignore_fail: bool) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn download(&self, url: &str, dest: &Path, progress: &DownloadProgress) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("missing") {
                return Err(BisectError::ArtifactMissing(url.to_string()));
            }
            if url.contains("slow") {
                std::future::pending::<()>().await;
            }
            if self.fail_first && call == 0 {
                return Err(BisectError::BackendUnavailable("reset".into()));
            }
            tokio::fs::write(dest, url.as_bytes()).await?;
            progress.add_received(url.len() as u64);
            Ok(url.len() as u64)
        }
    }

    fn job(dir: &Path, descriptor: DownloadDescriptor, fetcher: Arc<EchoFetcher>) -> DownloadJob {
        DownloadJob::new(
            Revision::from(42),
            descriptor,
            fetcher,
            RetryPolicy::immediate(3),
            dir,
        )
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_single_download_lifecycle() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(EchoFetcher::default());
        let mut job = job(
            dir.path(),
            DownloadDescriptor::single("http://x.test/42/chrome-linux.zip")?,
            fetcher,
        );
        assert_eq!(job.state(), JobState::New);
        let artifacts = job.wait_for(&SilentLogger).await?;
        assert_eq!(job.state(), JobState::Done);
        let FetchedArtifacts::Single(path) = &artifacts else {
            panic!("expected a single artifact");
        };
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("-chrome-linux.zip"));
        assert_eq!(std::fs::read_to_string(path)?, "http://x.test/42/chrome-linux.zip");

        // Idempotent after completion.
        assert_eq!(job.wait_for(&SilentLogger).await?, artifacts);

        job.stop().await;
        assert_eq!(job.state(), JobState::Disposed);
        assert_eq!(entries(dir.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_multi_download() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let descriptor = DownloadDescriptor::multi([
            (Role::TrichromeLibrary, "gs://b/1/TrichromeLibrary.apk".to_string()),
            (Role::Trichrome, "gs://b/1/TrichromeChrome.apks".to_string()),
        ])?;
        let mut job = job(dir.path(), descriptor, Arc::new(EchoFetcher::default()));
        let artifacts = job.wait_for(&SilentLogger).await?;
        assert!(artifacts.require(Role::Trichrome)?.is_file());
        assert!(artifacts.require(Role::TrichromeLibrary)?.is_file());
        assert_eq!(entries(dir.path()), 2);
        job.stop().await;
        assert_eq!(entries(dir.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_artifact_not_retried() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(EchoFetcher::default());
        let mut job = job(
            dir.path(),
            DownloadDescriptor::single("http://x.test/missing.zip")?,
            fetcher.clone(),
        );
        let result = job.wait_for(&SilentLogger).await;
        assert!(matches!(result, Err(BisectError::ArtifactMissing(_))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        // The failure is sticky.
        assert!(matches!(
            job.wait_for(&SilentLogger).await,
            Err(BisectError::ArtifactMissing(_))
        ));
        job.stop().await;
        assert_eq!(entries(dir.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failure_retried() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(EchoFetcher {
            fail_first: true,
            ..Default::default()
        });
        let mut job = job(
            dir.path(),
            DownloadDescriptor::single("http://x.test/ok.zip")?,
            fetcher.clone(),
        );
        job.wait_for(&SilentLogger).await?;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_mid_transfer_cleans_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut job = job(
            dir.path(),
            DownloadDescriptor::single("http://x.test/slow.zip")?,
            Arc::new(EchoFetcher::default()),
        );
        job.start()?;
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(entries(dir.path()), 1);
        job.stop().await;
        assert_eq!(entries(dir.path()), 0);
        assert!(matches!(
            job.wait_for(&SilentLogger).await,
            Err(BisectError::Cancelled(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_cleans_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut job = job(
                dir.path(),
                DownloadDescriptor::single("http://x.test/slow.zip")?,
                Arc::new(EchoFetcher::default()),
            );
            job.start()?;
        }
        assert_eq!(entries(dir.path()), 0);
        Ok(())
    }
}
