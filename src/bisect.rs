// Bisection driver: narrows a good/bad window one tested revision at a time
//
// The driver owns at most two download jobs: the one for the revision under
// test and a speculative prefetch of the next midpoint. Both are stopped on
// every exit path. Cancelling the interrupt token ends the run at the next
// download wait or launch, after the installed build is removed.

use crate::backend::{ArtifactBackend, list_with_cache};
use crate::cache::RevListCache;
use crate::constants;
use crate::descriptor::FetchedArtifacts;
use crate::download::DownloadJob;
use crate::error::{BisectError, Result};
use crate::logger::{BisectLogger, SilentLogger};
use crate::remote::Fetcher;
use crate::retry::RetryPolicy;
use crate::revision::{Revision, changelog_url};
use crate::runner::{BuildRunner, HandleSet};
use crate::verdict::{Evaluation, Evaluator, RunStatus, Verdict};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which half of the window to prefetch while the midpoint is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefetchStrategy {
    /// Expect the midpoint to be good and fetch the midpoint of the upper half.
    #[default]
    AssumeGood,
    /// Expect the midpoint to be bad and fetch the midpoint of the lower half.
    AssumeBad,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Launches per tested revision
    pub times: u32,
    pub launch_timeout: Duration,
    /// Browser args passed to every launch
    pub args: Vec<String>,
    /// Test both endpoints before bisecting
    pub verify_range: bool,
    pub prefetch: PrefetchStrategy,
    /// Where download temp files and scratch dirs are created
    pub temp_root: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            times: 1,
            launch_timeout: Duration::from_secs(constants::DEFAULT_LAUNCH_TIMEOUT_SECS),
            args: Vec::new(),
            verify_range: false,
            prefetch: PrefetchStrategy::AssumeGood,
            temp_root: std::env::temp_dir(),
            retry: RetryPolicy::default(),
        }
    }
}

/// One verdict given during the run.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub revision: Revision,
    pub verdict: Verdict,
    /// `None` when the revision was skipped without running
    pub status: Option<RunStatus>,
    pub at: DateTime<Local>,
}

/// Final window and what it took to get there.
#[derive(Debug, Clone)]
pub struct BisectReport {
    /// Last known good revision
    pub good: Revision,
    /// First known bad revision
    pub bad: Revision,
    pub history: Vec<HistoryEntry>,
    /// Total `BuildRunner::launch` calls
    pub launches: usize,
}

impl BisectReport {
    pub fn changelog_url(&self) -> String {
        changelog_url(&self.good, &self.bad)
    }

    /// Names the culprit range in the orientation the endpoints were given.
    pub fn done_message(&self) -> String {
        if self.good < self.bad {
            format!(
                "You are probably looking for a change made after {} (known good), but no later than {} (first known bad).",
                self.good, self.bad
            )
        } else {
            format!(
                "You are probably looking for a change made after {} (known bad), but no later than {} (first known good).",
                self.bad, self.good
            )
        }
    }

    /// Revisions dropped from the window as unknown.
    pub fn skipped(&self) -> impl Iterator<Item = &Revision> {
        self.history
            .iter()
            .filter(|entry| entry.verdict == Verdict::Unknown)
            .map(|entry| &entry.revision)
    }
}

/// Upper bound on the steps left for a window whose endpoints are `span`
/// positions apart: `ceil(log2(span))`.
pub fn steps_left(span: usize) -> u32 {
    if span <= 1 {
        0
    } else {
        usize::BITS - (span - 1).leading_zeros()
    }
}

/// The jobs alive at any point: the revision under test and the prefetch.
#[derive(Default)]
struct Jobs {
    current: Option<DownloadJob>,
    next: Option<DownloadJob>,
}

impl Jobs {
    async fn stop_current(&mut self) {
        if let Some(mut job) = self.current.take() {
            job.stop().await;
        }
    }

    async fn stop_all(&mut self) {
        self.stop_current().await;
        if let Some(mut job) = self.next.take() {
            job.stop().await;
        }
    }
}

pub struct BisectDriver {
    backend: Arc<dyn ArtifactBackend>,
    runner: Arc<dyn BuildRunner>,
    fetcher: Arc<dyn Fetcher>,
    cache: RevListCache,
    logger: Arc<dyn BisectLogger>,
    config: DriverConfig,
    interrupt: CancellationToken,
    history: Vec<HistoryEntry>,
    launches: usize,
}

impl BisectDriver {
    pub fn new(
        backend: Arc<dyn ArtifactBackend>,
        runner: Arc<dyn BuildRunner>,
        fetcher: Arc<dyn Fetcher>,
        config: DriverConfig,
    ) -> Self {
        Self {
            backend,
            runner,
            fetcher,
            cache: RevListCache::disabled(),
            logger: Arc::new(SilentLogger),
            config,
            interrupt: CancellationToken::new(),
            history: Vec::new(),
            launches: 0,
        }
    }

    pub fn with_cache(mut self, cache: RevListCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn BisectLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Cancelling `token` makes `run` fail with `Interrupted` once live
    /// downloads are stopped and the build under test is uninstalled.
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn cache_mut(&mut self) -> &mut RevListCache {
        &mut self.cache
    }

    /// Bisects between `good` and `bad` (the backend's latest revision when
    /// `bad` is `None`). Endpoints may be given in either order.
    pub async fn run(
        &mut self,
        good: &Revision,
        bad: Option<&Revision>,
        evaluator: &mut dyn Evaluator,
    ) -> Result<BisectReport> {
        self.history.clear();
        self.launches = 0;

        let bad = match bad {
            Some(bad) => bad.clone(),
            None => {
                let backend = self.backend.clone();
                let latest = self.config.retry.run("Fetch latest revision", || backend.latest()).await?;
                log::info!("Using latest revision {} as bad", latest);
                latest
            }
        };

        let listed = list_with_cache(self.backend.as_ref(), &mut self.cache, &self.config.retry, good, &bad).await?;
        self.logger.on_revisions_listed(&self.backend.key(), listed.len());
        let mut list = listed.into_vec();
        if good > &bad {
            list.reverse();
        }

        let mut jobs = Jobs::default();
        let outcome = self.bisect(&mut list, &mut jobs, evaluator).await;
        jobs.stop_all().await;
        let (lo, hi) = outcome?;

        Ok(BisectReport {
            good: list[lo].clone(),
            bad: list[hi].clone(),
            history: std::mem::take(&mut self.history),
            launches: self.launches,
        })
    }

    /// The main loop over `list`, oriented good first. Returns the final
    /// `(good, bad)` indices.
    async fn bisect(
        &mut self,
        list: &mut Vec<Revision>,
        jobs: &mut Jobs,
        evaluator: &mut dyn Evaluator,
    ) -> Result<(usize, usize)> {
        let mut lo = 0;
        let mut hi = list.len().saturating_sub(1);
        if hi == 0 {
            return Err(BisectError::InternalInvariantViolation(
                "bisecting a list with fewer than two revisions".into(),
            ));
        }

        if self.config.verify_range {
            self.verify_endpoints(&list[lo], &list[hi], jobs, evaluator).await?;
        }

        while hi - lo > 1 {
            let steps = steps_left(hi - lo);
            let remaining = hi - lo - 1;
            let changelog = (steps <= constants::STEPS_TO_SHOW_CHANGELOG_URL)
                .then(|| changelog_url(&list[lo], &list[hi]));
            self.logger
                .on_window(&list[lo], &list[hi], remaining, steps, changelog.as_deref());

            let mid = lo + (hi - lo) / 2;
            let rev = list[mid].clone();
            let job = match jobs.next.take() {
                Some(job) if job.revision() == &rev => job,
                Some(mut stale) => {
                    stale.stop().await;
                    self.new_job(&rev)?
                }
                None => self.new_job(&rev)?,
            };
            let current = jobs.current.insert(job);

            let waited = tokio::select! {
                waited = current.wait_for(self.logger.as_ref()) => waited,
                _ = self.interrupt.cancelled() => Err(BisectError::Interrupted),
            };
            let artifacts = match waited {
                Ok(artifacts) => artifacts,
                Err(BisectError::ArtifactMissing(url)) => {
                    self.logger.on_skipped(&rev, &format!("no build at {}", url));
                    self.record(&rev, Verdict::Unknown, None);
                    jobs.stop_current().await;
                    list.remove(mid);
                    hi -= 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(target) = self.prefetch_index(lo, mid, hi) {
                let mut prefetch = self.new_job(&list[target])?;
                prefetch.start()?;
                jobs.next = Some(prefetch);
            }

            let verdict = self.judge(&rev, &artifacts, remaining, steps, evaluator).await?;
            jobs.stop_current().await;
            match verdict {
                Verdict::Good => lo = mid,
                Verdict::Bad => hi = mid,
                Verdict::Unknown => {
                    list.remove(mid);
                    hi -= 1;
                }
                Verdict::Quit => return Err(BisectError::UserQuit),
                Verdict::Retry => {
                    return Err(BisectError::InternalInvariantViolation(
                        "retry escaped the evaluation loop".into(),
                    ));
                }
            }
        }
        Ok((lo, hi))
    }

    /// Tests both endpoints and fails unless they reproduce as given.
    async fn verify_endpoints(
        &mut self,
        good: &Revision,
        bad: &Revision,
        jobs: &mut Jobs,
        evaluator: &mut dyn Evaluator,
    ) -> Result<()> {
        let mut good_job = self.new_job(good)?;
        good_job.start()?;
        let mut bad_job = self.new_job(bad)?;
        bad_job.start()?;
        jobs.current = Some(good_job);
        jobs.next = Some(bad_job);

        let checks = [(jobs.current.as_mut(), Verdict::Good), (jobs.next.as_mut(), Verdict::Bad)];
        for (job, expected) in checks {
            let Some(job) = job else {
                return Err(BisectError::InternalInvariantViolation("endpoint job missing".into()));
            };
            let rev = job.revision().clone();
            let artifacts = tokio::select! {
                waited = job.wait_for(self.logger.as_ref()) => waited?,
                _ = self.interrupt.cancelled() => return Err(BisectError::Interrupted),
            };
            let verdict = self.judge(&rev, &artifacts, 0, 0, evaluator).await?;
            if verdict == Verdict::Quit {
                return Err(BisectError::UserQuit);
            }
            if verdict != expected {
                return Err(BisectError::RangeVerification {
                    revision: rev.to_string(),
                    expected: expected.to_string(),
                    actual: verdict.to_string(),
                });
            }
        }
        jobs.stop_all().await;
        Ok(())
    }

    fn new_job(&self, rev: &Revision) -> Result<DownloadJob> {
        Ok(DownloadJob::new(
            rev.clone(),
            self.backend.descriptor(rev)?,
            self.fetcher.clone(),
            self.config.retry,
            self.config.temp_root.clone(),
        ))
    }

    /// Midpoint of the half kept if the expected verdict comes in.
    fn prefetch_index(&self, lo: usize, mid: usize, hi: usize) -> Option<usize> {
        match self.config.prefetch {
            PrefetchStrategy::AssumeGood => (hi - mid > 1).then(|| mid + (hi - mid) / 2),
            PrefetchStrategy::AssumeBad => (mid - lo > 1).then(|| lo + (mid - lo) / 2),
        }
    }

    /// Runs `rev` and asks the evaluator until it answers something other
    /// than retry.
    async fn judge(
        &mut self,
        rev: &Revision,
        artifacts: &FetchedArtifacts,
        remaining: usize,
        steps: u32,
        evaluator: &mut dyn Evaluator,
    ) -> Result<Verdict> {
        loop {
            self.logger.on_trying(rev, remaining, steps);
            let evaluation = self.evaluate(rev, artifacts).await?;
            let verdict = evaluator.evaluate(&evaluation)?;
            if self.interrupt.is_cancelled() {
                return Err(BisectError::Interrupted);
            }
            self.logger.on_verdict(rev, verdict);
            self.record(rev, verdict, Some(evaluation.status));
            if verdict != Verdict::Retry {
                return Ok(verdict);
            }
        }
    }

    /// Installs `artifacts` into a fresh scratch dir and launches up to
    /// `times` times, stopping at the first unsuccessful run.
    async fn evaluate(&mut self, rev: &Revision, artifacts: &FetchedArtifacts) -> Result<Evaluation> {
        let scratch = tempfile::Builder::new()
            .prefix(constants::SCRATCH_DIR_PREFIX)
            .tempdir_in(&self.config.temp_root)?;

        let mut evaluation = Evaluation {
            revision: rev.clone(),
            status: RunStatus::Exited(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        let handles = match self.runner.install(artifacts, scratch.path()).await {
            Ok(handles) => handles,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Failed to install {}: {}", rev, e);
                evaluation.status = RunStatus::Failed(e.to_string());
                self.logger.on_run_finished(rev, &evaluation.status);
                return Ok(evaluation);
            }
        };

        let interrupt = self.interrupt.clone();
        let launched = tokio::select! {
            launched = self.launch_times(&handles, &mut evaluation) => launched,
            _ = interrupt.cancelled() => Err(BisectError::Interrupted),
        };
        if let Err(e) = self.runner.uninstall(&handles).await {
            log::warn!("Failed to uninstall {}: {}", rev, e);
        }
        if let Err(e) = scratch.close() {
            log::warn!("Failed to remove scratch dir for {}: {}", rev, e);
        }
        launched?;

        self.logger.on_run_finished(rev, &evaluation.status);
        Ok(evaluation)
    }

    async fn launch_times(&mut self, handles: &HandleSet, evaluation: &mut Evaluation) -> Result<()> {
        for _ in 0..self.config.times {
            self.launches += 1;
            match self
                .runner
                .launch(handles, &self.config.args, self.config.launch_timeout)
                .await
            {
                Ok(out) => {
                    evaluation.status = match out.status {
                        Some(code) => RunStatus::Exited(code),
                        None => RunStatus::Failed("terminated by signal".into()),
                    };
                    evaluation.stdout = out.stdout;
                    evaluation.stderr = out.stderr;
                }
                Err(BisectError::LaunchTimeout(_)) => evaluation.status = RunStatus::Timeout,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => evaluation.status = RunStatus::Failed(e.to_string()),
            }
            if !evaluation.status.is_success() {
                break;
            }
        }
        Ok(())
    }

    fn record(&mut self, rev: &Revision, verdict: Verdict, status: Option<RunStatus>) {
        self.history.push(HistoryEntry {
            revision: rev.clone(),
            verdict,
            status,
            at: Local::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_left() {
        assert_eq!(steps_left(0), 0);
        assert_eq!(steps_left(1), 0);
        assert_eq!(steps_left(2), 1);
        assert_eq!(steps_left(4), 2);
        assert_eq!(steps_left(5), 3);
        assert_eq!(steps_left(9900), 14);
    }

    fn report(good: u32, bad: u32) -> BisectReport {
        BisectReport {
            good: good.into(),
            bad: bad.into(),
            history: Vec::new(),
            launches: 0,
        }
    }

    #[test]
    fn test_done_message_orientation() {
        assert_eq!(
            report(100, 101).done_message(),
            "You are probably looking for a change made after 100 (known good), but no later than 101 (first known bad)."
        );
        assert_eq!(
            report(501, 500).done_message(),
            "You are probably looking for a change made after 500 (known bad), but no later than 501 (first known good)."
        );
        assert_eq!(report(501, 500).changelog_url(), report(500, 501).changelog_url());
    }
}
