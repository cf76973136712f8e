// Progress reporting hooks for the bisection driver
use crate::revision::Revision;
use crate::verdict::{RunStatus, Verdict};

/// Receives user-facing progress events. Diagnostics go through `log`.
pub trait BisectLogger: Send + Sync {
    /// Revision list obtained for the bisect window.
    fn on_revisions_listed(&self, key: &str, count: usize);

    /// The window changed; `steps` is an upper bound on remaining steps.
    fn on_window(&self, good: &Revision, bad: &Revision, candidates: usize, steps: u32, changelog: Option<&str>);

    fn on_download_start(&self, revision: &Revision);

    fn on_download_progress(&self, revision: &Revision, received: u64, total: Option<u64>);

    fn on_download_done(&self, revision: &Revision, bytes: u64);

    /// About to install and launch `revision`.
    fn on_trying(&self, revision: &Revision, remaining: usize, steps: u32);

    fn on_run_finished(&self, revision: &Revision, status: &RunStatus);

    /// `revision` was dropped from the window without a test.
    fn on_skipped(&self, revision: &Revision, reason: &str);

    fn on_verdict(&self, revision: &Revision, verdict: Verdict);

    fn on_warning(&self, message: &str);
}

/// Discards every event (tests and library callers without a terminal).
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentLogger;

impl BisectLogger for SilentLogger {
    fn on_revisions_listed(&self, _key: &str, _count: usize) {}

    fn on_window(&self, _good: &Revision, _bad: &Revision, _candidates: usize, _steps: u32, _changelog: Option<&str>) {}

    fn on_download_start(&self, _revision: &Revision) {}

    fn on_download_progress(&self, _revision: &Revision, _received: u64, _total: Option<u64>) {}

    fn on_download_done(&self, _revision: &Revision, _bytes: u64) {}

    fn on_trying(&self, _revision: &Revision, _remaining: usize, _steps: u32) {}

    fn on_run_finished(&self, _revision: &Revision, _status: &RunStatus) {}

    fn on_skipped(&self, revision: &Revision, reason: &str) {
        log::debug!("Skipping {}: {}", revision, reason);
    }

    fn on_verdict(&self, _revision: &Revision, _verdict: Verdict) {}

    fn on_warning(&self, message: &str) {
        log::warn!("{}", message);
    }
}
