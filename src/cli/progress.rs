// Terminal progress for bisection runs, with an indicatif bar per download
use super::utils;
use bisect_builds::logger::BisectLogger;
use bisect_builds::revision::Revision;
use bisect_builds::verdict::{RunStatus, Verdict};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

pub struct CliLogger {
    quiet: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl CliLogger {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: Mutex::new(None),
        }
    }

    fn download_bar(revision: &Revision) -> ProgressBar {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ ");
        pb.set_style(style);
        pb.set_message(format!("revision {}", revision));
        pb
    }

    fn take_bar(&self) -> Option<ProgressBar> {
        self.bar.lock().ok().and_then(|mut bar| bar.take())
    }
}

impl BisectLogger for CliLogger {
    fn on_revisions_listed(&self, key: &str, count: usize) {
        if !self.quiet {
            println!("Found {} builds in {}", count, key);
        }
    }

    fn on_window(&self, good: &Revision, bad: &Revision, candidates: usize, steps: u32, changelog: Option<&str>) {
        if self.quiet {
            return;
        }
        println!(
            "You have {} revisions with about {} steps left.",
            utils::format_number(candidates as u64),
            steps
        );
        let suffix = changelog.map(|url| format!(" CHANGELOG URL: {}", url)).unwrap_or_default();
        println!("Bisecting range [{} (bad), {} (good)].{}", bad, good, suffix);
    }

    fn on_download_start(&self, revision: &Revision) {
        if self.quiet {
            return;
        }
        if let Ok(mut bar) = self.bar.lock() {
            *bar = Some(Self::download_bar(revision));
        }
    }

    fn on_download_progress(&self, _revision: &Revision, received: u64, total: Option<u64>) {
        if let Ok(bar) = self.bar.lock()
            && let Some(pb) = bar.as_ref()
        {
            if let Some(total) = total {
                pb.set_length(total);
            }
            pb.set_position(received);
        }
    }

    fn on_download_done(&self, revision: &Revision, bytes: u64) {
        if let Some(pb) = self.take_bar() {
            pb.finish_and_clear();
        }
        if !self.quiet {
            println!("Downloaded revision {} ({})", revision, utils::format_bytes(bytes));
        }
    }

    fn on_trying(&self, revision: &Revision, _remaining: usize, _steps: u32) {
        if !self.quiet {
            println!("Trying revision {}...", revision);
        }
    }

    fn on_run_finished(&self, revision: &Revision, status: &RunStatus) {
        if !self.quiet {
            println!("Revision {} finished: {}", revision, status);
        }
    }

    fn on_skipped(&self, revision: &Revision, reason: &str) {
        if let Some(pb) = self.take_bar() {
            pb.finish_and_clear();
        }
        eprintln!("Skipping revision {}: {}", revision, reason);
    }

    fn on_verdict(&self, revision: &Revision, verdict: Verdict) {
        log::info!("Revision {} is {}", revision, verdict);
    }

    fn on_warning(&self, message: &str) {
        eprintln!("WARNING: {}", message);
    }
}
