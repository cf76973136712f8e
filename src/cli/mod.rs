use anyhow::Result;
use bisect_builds::bisect::PrefetchStrategy;
use bisect_builds::constants;
use bisect_builds::options::{BisectOptions, OptionsBuilder};
use bisect_builds::target::BuildType;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use std::time::Duration;

// CLI Commands (cmd_ prefix)
mod cmd_bisect;
mod cmd_update;

// Helper modules (no cmd_ prefix)
mod logger;
mod progress;
mod utils;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(bin_name = "bisect-builds")]
#[command(version = VERSION)]
#[command(about = concat!("bisect-builds v", env!("CARGO_PKG_VERSION"), " - Bisect archived Chrome builds"))]
#[command(long_about = concat!(
    "bisect-builds v", env!("CARGO_PKG_VERSION"), " - Bisect archived Chrome builds\n\n",
    "Downloads archived Chromium snapshots, official or release builds of\n",
    "Chrome, runs them and asks whether each one is good or bad until the\n",
    "change that introduced a regression is narrowed down.\n\n",
    "Browser flags go after `--`, e.g.\n",
    "  bisect-builds -a linux64 -g 1015000 -b 1016000 -- --no-first-run"
))]
#[command(after_help = concat!(
    "Tip: add \"-- --no-first-run\" to bypass the first run prompts.\n",
    "Commit positions are listed at https://crrev.com; Chrome versions at\n",
    "https://chromiumdash.appspot.com/releases."
))]
pub struct Cli {
    /// Archive to bisect, e.g. linux64, mac-arm, win64, android-arm64, ios.
    /// Detected from the host when omitted
    #[arg(short = 'a', long)]
    archive: Option<String>,

    /// Bisect Chromium snapshot archives (default)
    #[arg(short = 's', long)]
    snapshot: bool,

    /// Bisect Chrome release builds by version
    #[arg(short = 'r', long)]
    release: bool,

    /// Bisect continuous official Chrome builds (internal only)
    #[arg(short = 'o', long)]
    official: bool,

    /// Bisect ASAN builds
    #[arg(long)]
    asan: bool,

    /// Good revision: commit position, version or milestone (M85).
    /// May be earlier or later than the bad revision
    #[arg(short = 'g', long, value_name = "GOOD_REVISION", required_unless_present = "update_script")]
    good: Option<String>,

    /// Bad revision. Defaults to the latest available build
    #[arg(short = 'b', long, value_name = "BAD_REVISION")]
    bad: Option<String>,

    /// Profile to use; %t is replaced by the run's temp dir
    #[arg(short = 'p', long, visible_alias = "user-data-dir", default_value = constants::DEFAULT_PROFILE)]
    profile: String,

    /// Number of times to run each build before asking for a verdict
    #[arg(short = 't', long, default_value_t = 1)]
    times: u32,

    /// Also download chromedriver; use %d in --command to reference it
    #[arg(long)]
    chromedriver: bool,

    /// Command to execute. %p is the browser, %a the extra arguments,
    /// %t the temp dir and %d the chromedriver path
    #[arg(short = 'c', long, default_value = constants::DEFAULT_COMMAND)]
    command: String,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Suppress progress output
    #[arg(long)]
    quiet: bool,

    /// Use the exit code to tell good from bad instead of asking
    #[arg(long)]
    not_interactive: bool,

    /// Cache the list of known revisions (default)
    #[arg(long, overrides_with = "no_local_cache")]
    use_local_cache: bool,

    /// Do not cache the list of known revisions
    #[arg(long, overrides_with = "use_local_cache")]
    no_local_cache: bool,

    /// Test the first and last revisions before bisecting
    #[arg(long)]
    verify_range: bool,

    /// Android APK to bisect
    #[arg(long, default_value = constants::DEFAULT_APK)]
    apk: String,

    /// iOS ipa to bisect
    #[arg(long, default_value = constants::DEFAULT_IPA)]
    ipa: String,

    /// Use signed release binaries (Android and iOS only)
    #[arg(long)]
    signed: bool,

    /// Device to run the bisect on (adb serial, iOS device or simulator id)
    #[arg(short = 'd', long)]
    device_id: Option<String>,

    /// Seconds before a launch is considered hung
    #[arg(long, value_name = "SECONDS", default_value_t = constants::DEFAULT_LAUNCH_TIMEOUT_SECS)]
    launch_timeout: u64,

    /// Which half of the window to download ahead
    #[arg(long, value_enum, default_value = "good")]
    prefetch: PrefetchArg,

    /// Update this tool to the latest published version and exit
    #[arg(long)]
    update_script: bool,

    /// Where --update-script fetches from
    #[arg(long, default_value = constants::UPDATE_SCRIPT_URL, hide = true)]
    update_url: String,

    /// Extra arguments passed to the browser
    #[arg(last = true, value_name = "CHROMIUM_OPTION")]
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PrefetchArg {
    /// Assume the tested build is good
    Good,
    /// Assume the tested build is bad
    Bad,
}

impl Cli {
    fn options(&self) -> BisectOptions {
        let build_type = BuildType::from_flags(self.asan, self.release, self.official);
        if self.snapshot && build_type != BuildType::Snapshot {
            log::warn!("-s is overridden by {}", build_type.flag());
        }
        let prefetch = match self.prefetch {
            PrefetchArg::Good => PrefetchStrategy::AssumeGood,
            PrefetchArg::Bad => PrefetchStrategy::AssumeBad,
        };
        let mut builder = OptionsBuilder::new()
            .build_type(build_type)
            .good(self.good.clone().unwrap_or_default())
            .signed(self.signed)
            .apk(self.apk.clone())
            .ipa(self.ipa.clone())
            .chromedriver(self.chromedriver)
            .command(self.command.clone())
            .profile(self.profile.clone())
            .times(self.times)
            .use_local_cache(self.use_local_cache || !self.no_local_cache)
            .verify_range(self.verify_range)
            .not_interactive(self.not_interactive)
            .launch_timeout(Duration::from_secs(self.launch_timeout))
            .prefetch(prefetch)
            .args(self.args.clone());
        if let Some(archive) = &self.archive {
            builder = builder.archive(archive.clone());
        }
        if let Some(bad) = &self.bad {
            builder = builder.bad(bad.clone());
        }
        if let Some(device_id) = &self.device_id {
            builder = builder.device_id(device_id.clone());
        }
        builder.build()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger based on verbosity flags
    logger::init_logger(cli.verbose, cli.quiet);

    if cli.update_script {
        return cmd_update::run(&cli.update_url);
    }

    let options = cli.options();
    if let Err(e) = options.validate() {
        Cli::command().error(ErrorKind::ArgumentConflict, e.to_string()).exit();
    }
    let argv: Vec<String> = std::env::args().collect();
    cmd_bisect::run(options, argv, cli.quiet)
}
