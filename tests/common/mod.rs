#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bisect_builds::backend::ArtifactBackend;
use bisect_builds::bisect::{BisectDriver, DriverConfig};
use bisect_builds::descriptor::{DownloadDescriptor, FetchedArtifacts, Role};
use bisect_builds::error::{BisectError, Result};
use bisect_builds::remote::{DownloadProgress, Fetcher};
use bisect_builds::retry::RetryPolicy;
use bisect_builds::revision::{Revision, RevisionKind, RevisionList};
use bisect_builds::runner::{BuildRunner, HandleSet};
use bisect_builds::target::BackendVariant;
use bisect_builds::tools::ToolOutput;
use bisect_builds::verdict::{Evaluation, Evaluator, RunStatus, Verdict};
use tokio_util::sync::CancellationToken;

const FAKE_HOST: &str = "https://builds.invalid";

pub fn setup_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().map_err(anyhow::Error::from)
}

pub fn position(rev: &Revision) -> u32 {
    rev.as_commit_position().unwrap_or_default()
}

// ============================================================================
// Backend
// ============================================================================

/// Commit-position backend over a fixed list. Records every listing call.
pub struct FakeBackend {
    revisions: Vec<u32>,
    missing: HashSet<u32>,
    pub calls: Mutex<Vec<(Option<u32>, Option<u32>)>>,
}

impl FakeBackend {
    pub fn new<I: IntoIterator<Item = u32>>(revisions: I) -> Self {
        let mut revisions: Vec<u32> = revisions.into_iter().collect();
        revisions.sort_unstable();
        revisions.dedup();
        Self {
            revisions,
            missing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Revisions that are listed but whose download answers 404.
    pub fn with_missing<I: IntoIterator<Item = u32>>(mut self, missing: I) -> Self {
        self.missing.extend(missing);
        self
    }

    pub fn calls(&self) -> Vec<(Option<u32>, Option<u32>)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactBackend for FakeBackend {
    fn variant(&self) -> BackendVariant {
        BackendVariant::SnapshotHttp
    }

    fn key(&self) -> String {
        "fake-snapshot-linux64".to_string()
    }

    fn kind(&self) -> RevisionKind {
        RevisionKind::CommitPosition
    }

    async fn list_revisions(&self, lo: Option<&Revision>, hi: Option<&Revision>) -> Result<RevisionList> {
        let lo = lo.map(position);
        let hi = hi.map(position);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((lo, hi));
        }
        let listed = self
            .revisions
            .iter()
            .copied()
            .filter(|r| lo.is_none_or(|lo| *r >= lo) && hi.is_none_or(|hi| *r <= hi))
            .map(Revision::from);
        RevisionList::from_unsorted(RevisionKind::CommitPosition, listed)
    }

    fn descriptor(&self, rev: &Revision) -> Result<DownloadDescriptor> {
        let n = position(rev);
        if self.missing.contains(&n) {
            DownloadDescriptor::single(format!("{}/missing/{}/chrome-linux.zip", FAKE_HOST, n))
        } else {
            DownloadDescriptor::single(format!("{}/{}/chrome-linux.zip", FAKE_HOST, n))
        }
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Writes a small payload for every download. Tracks how many transfers
/// overlap.
#[derive(Default)]
pub struct MockFetcher {
    delay: Duration,
    pub downloads: Mutex<Vec<String>>,
    active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().map(|d| d.len()).unwrap_or_default()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get_text(&self, url: &str) -> Result<String> {
        Err(BisectError::ArtifactMissing(url.to_string()))
    }

    async fn gs_list(&self, _urls: &[String], _ignore_fail: bool) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn download(&self, url: &str, dest: &Path, progress: &DownloadProgress) -> Result<u64> {
        if url.contains("/missing/") {
            return Err(BisectError::ArtifactMissing(url.to_string()));
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(self.active.clone());
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut downloads) = self.downloads.lock() {
            downloads.push(url.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let payload = format!("build from {}", url);
        tokio::fs::write(dest, payload.as_bytes()).await?;
        let bytes = payload.len() as u64;
        progress.add_total(bytes);
        progress.add_received(bytes);
        Ok(bytes)
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Pretends to install and launch; every launch exits with `exit_code`,
/// or hangs past its timeout when `times_out` is set.
#[derive(Default)]
pub struct FakeRunner {
    pub exit_code: i32,
    pub times_out: bool,
    /// Cancelled by the first launch, which then never finishes
    pub interrupt: Option<CancellationToken>,
    pub launches: AtomicUsize,
    pub uninstalls: AtomicUsize,
    pub scratch_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exiting(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn timing_out() -> Self {
        Self {
            times_out: true,
            ..Self::default()
        }
    }

    pub fn interrupting(token: CancellationToken) -> Self {
        Self {
            interrupt: Some(token),
            ..Self::default()
        }
    }

    pub fn uninstall_count(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        self.scratch_dirs.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BuildRunner for FakeRunner {
    async fn install(&self, artifacts: &FetchedArtifacts, scratch: &Path) -> Result<HandleSet> {
        let chrome = artifacts.require(Role::Chrome)?.to_path_buf();
        if !chrome.exists() {
            return Err(BisectError::InternalInvariantViolation(format!(
                "artifact {} vanished before install",
                chrome.display()
            )));
        }
        if let Ok(mut dirs) = self.scratch_dirs.lock() {
            dirs.push(scratch.to_path_buf());
        }
        Ok(HandleSet::Desktop {
            chrome,
            chromedriver: None,
            scratch: scratch.to_path_buf(),
        })
    }

    async fn launch(&self, _handles: &HandleSet, _args: &[String], timeout: Duration) -> Result<ToolOutput> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.times_out {
            return Err(BisectError::LaunchTimeout(timeout));
        }
        if let Some(token) = &self.interrupt {
            token.cancel();
            std::future::pending::<()>().await;
        }
        Ok(ToolOutput {
            status: Some(self.exit_code),
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn uninstall(&self, _handles: &HandleSet) -> Result<()> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Oracles
// ============================================================================

/// Answers from a script first, then from `truth`. Every answer is
/// recorded with the revision it was given for.
pub struct ScriptedOracle {
    script: VecDeque<Verdict>,
    truth: Box<dyn FnMut(u32) -> Verdict + Send>,
    retry_first: bool,
    pub answers: Vec<(u32, Verdict)>,
    /// Run status and proposed default of every evaluation shown
    pub shown: Vec<(RunStatus, Option<Verdict>)>,
}

impl ScriptedOracle {
    pub fn new<F>(truth: F) -> Self
    where
        F: FnMut(u32) -> Verdict + Send + 'static,
    {
        Self {
            script: VecDeque::new(),
            truth: Box::new(truth),
            retry_first: false,
            answers: Vec::new(),
            shown: Vec::new(),
        }
    }

    /// Good below `boundary`, bad from it on.
    pub fn monotone(boundary: u32) -> Self {
        Self::new(move |r| if r < boundary { Verdict::Good } else { Verdict::Bad })
    }

    pub fn with_script<I: IntoIterator<Item = Verdict>>(mut self, script: I) -> Self {
        self.script.extend(script);
        self
    }

    /// Answer retry the first time each revision is shown.
    pub fn retry_first(mut self) -> Self {
        self.retry_first = true;
        self
    }

    pub fn asked(&self) -> Vec<u32> {
        self.answers.iter().map(|(r, _)| *r).collect()
    }
}

impl Evaluator for ScriptedOracle {
    fn evaluate(&mut self, evaluation: &Evaluation) -> Result<Verdict> {
        let rev = position(&evaluation.revision);
        self.shown.push((evaluation.status.clone(), evaluation.proposed()));
        let seen = self.answers.iter().any(|(r, _)| *r == rev);
        let verdict = if let Some(scripted) = self.script.pop_front() {
            scripted
        } else if self.retry_first && !seen {
            Verdict::Retry
        } else {
            (self.truth)(rev)
        };
        self.answers.push((rev, verdict));
        Ok(verdict)
    }
}

// ============================================================================
// Driver
// ============================================================================

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub fetcher: Arc<MockFetcher>,
    pub runner: Arc<FakeRunner>,
    pub temp: tempfile::TempDir,
}

impl Harness {
    pub fn new(backend: FakeBackend) -> anyhow::Result<Self> {
        Ok(Self {
            backend: Arc::new(backend),
            fetcher: Arc::new(MockFetcher::new()),
            runner: Arc::new(FakeRunner::new()),
            temp: setup_temp_dir()?,
        })
    }

    pub fn with_fetcher(mut self, fetcher: MockFetcher) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn with_runner(mut self, runner: FakeRunner) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    pub fn config(&self) -> DriverConfig {
        DriverConfig {
            temp_root: self.temp.path().to_path_buf(),
            retry: RetryPolicy::none(),
            ..DriverConfig::default()
        }
    }

    pub fn driver(&self, config: DriverConfig) -> BisectDriver {
        BisectDriver::new(self.backend.clone(), self.runner.clone(), self.fetcher.clone(), config)
    }

    /// Files left under the per-test temp root.
    pub fn leftovers(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.temp.path())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}
