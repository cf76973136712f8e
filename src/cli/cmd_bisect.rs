use super::progress::CliLogger;
use super::utils;
use bisect_builds::advisor;
use anyhow::{Context, Result};
use bisect_builds::backend::{create_backend, list_with_cache};
use bisect_builds::bisect::{BisectDriver, BisectReport};
use bisect_builds::cache::RevListCache;
use bisect_builds::constants;
use bisect_builds::error::BisectError;
use bisect_builds::gsutil::Gsutil;
use bisect_builds::options::BisectOptions;
use bisect_builds::remote::{Fetcher, LiveFetcher};
use bisect_builds::resolve::resolve_endpoint;
use bisect_builds::retry::RetryPolicy;
use bisect_builds::revision::{Revision, RevisionKind};
use bisect_builds::runner::{AdbDevice, create_runner};
use bisect_builds::target::{BuildType, Target};
use bisect_builds::tools::{LiveToolRunner, ToolRunner};
use bisect_builds::verdict::{AsanEvaluator, Evaluator, ExitCodeEvaluator, InteractivePrompt};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn run(options: BisectOptions, argv: Vec<String>, quiet: bool) -> Result<()> {
    for warning in options.warnings() {
        eprintln!("WARNING: {}", warning);
    }
    if options.archive.is_none() {
        println!("The buildbot archive (-a/--archive) detected as: {}", options.archive()?);
    }

    // Downloads and scratch dirs live here so a forced quit can remove them all.
    let run_dir = tempfile::Builder::new()
        .prefix(constants::TEMP_FILE_PREFIX)
        .tempdir()
        .context("Failed to create temp dir")?;
    let interrupt = CancellationToken::new();

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(async {
        let token = interrupt.clone();
        let interrupt_dir = run_dir.path().to_path_buf();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            // The driver stops its downloads and uninstalls the build under
            // test. A prompt waiting on stdin only sees this once answered.
            eprintln!("\nInterrupted, cleaning up... (press Ctrl-C again to quit now)");
            token.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                if let Err(e) = std::fs::remove_dir_all(&interrupt_dir) {
                    log::debug!("Cleanup of {} failed: {}", interrupt_dir.display(), e);
                }
                std::process::exit(130);
            }
        });
        run_async(options, argv, quiet, run_dir.path(), interrupt.clone()).await
    });
    drop(runtime);

    if interrupt.is_cancelled() {
        if let Err(e) = run_dir.close() {
            log::debug!("Cleanup of the run dir failed: {}", e);
        }
        std::process::exit(130);
    }
    outcome
}

async fn run_async(
    options: BisectOptions,
    argv: Vec<String>,
    quiet: bool,
    run_dir: &Path,
    interrupt: CancellationToken,
) -> Result<()> {
    let tools: Arc<dyn ToolRunner> = Arc::new(LiveToolRunner);
    let fetcher: Arc<dyn Fetcher> = Arc::new(LiveFetcher::new(Gsutil::locate(tools.clone()))?);

    let mut target = options.target()?;
    if target.is_android() {
        let device = AdbDevice::new(tools.clone(), target.device_id.clone());
        let sdk = device.sdk_level().await.context("Failed to query the Android device")?;
        log::info!("Android device SDK level: {}", sdk);
        target.android_sdk = Some(sdk);
    }

    let backend = create_backend(&target, fetcher.clone())?;
    let runner = create_runner(&target, options.launch_settings()?, tools)?;

    let kind = backend.kind();
    let good = resolve_endpoint(fetcher.as_ref(), &options.good, kind).await?;
    let bad = match &options.bad {
        Some(bad) => Some(resolve_endpoint(fetcher.as_ref(), bad, kind).await?),
        None => None,
    };

    let mut config = options.driver_config();
    config.temp_root = run_dir.to_path_buf();
    let cache = utils::open_cache(options.use_local_cache, options.cache_path.clone());
    let mut driver = BisectDriver::new(backend.clone(), runner, fetcher.clone(), config)
        .with_cache(cache)
        .with_logger(Arc::new(CliLogger::new(quiet)))
        .with_interrupt(interrupt);

    let fallback: Box<dyn Evaluator> = if options.not_interactive {
        Box::new(ExitCodeEvaluator)
    } else {
        Box::new(InteractivePrompt::stdio())
    };
    let mut evaluator: Box<dyn Evaluator> = if target.build_type == BuildType::Asan {
        Box::new(AsanEvaluator::new(fallback, std::io::stdout()))
    } else {
        fallback
    };

    let report = match driver.run(&good, bad.as_ref(), evaluator.as_mut()).await {
        Ok(report) => report,
        Err(BisectError::UserQuit) => {
            println!("Bisection aborted by user.");
            return Ok(());
        }
        Err(e) => return Err(anyhow::Error::from(e)),
    };

    print_report(&report, &target);
    if target.build_type == BuildType::Release {
        suggest_official(&target, &report, &argv, &fetcher, driver.cache_mut()).await;
    }
    Ok(())
}

fn print_report(report: &BisectReport, target: &Target) {
    println!("{}", report.done_message());
    println!("CHANGELOG URL:");
    println!("  {}", report.changelog_url());
    let skipped: Vec<String> = report.skipped().map(Revision::to_string).collect();
    if !skipped.is_empty() {
        println!("Skipped revisions: {}", skipped.join(", "));
    }
    if target.build_type == BuildType::Official {
        println!(
            "The script might not always return single CL as suspect as some perf builds might get missing due to failure."
        );
    }
}

/// Prints the official-build command that can split a release window further.
async fn suggest_official(
    target: &Target,
    report: &BisectReport,
    argv: &[String],
    fetcher: &Arc<dyn Fetcher>,
    cache: &mut RevListCache,
) {
    let Some(command) =
        advisor::suggest_mode_switch(target.variant(), &target.archive, &report.good, &report.bad, argv)
    else {
        return;
    };
    let Ok(command_line) = utils::join_command(&command) else {
        return;
    };

    if !cache.is_enabled() {
        println!(
            "You could try to get a more precise culprit range with the continuous official build (-o) using the following command:"
        );
        println!("{}", command_line);
        return;
    }
    match count_official_builds(target, report, fetcher, cache).await {
        Ok(count) if count > 2 => {
            println!(
                "There are {} revisions between {} and {} from the continuous official build (-o). \
                 You could try to get a more precise culprit range using the following command:",
                count, report.good, report.bad
            );
            println!("{}", command_line);
        }
        Ok(_) => println!("But we don't have more builds from official builder."),
        Err(e) => {
            log::debug!("Official listing failed: {}", e);
            println!("But we don't have more builds from official builder.");
        }
    }
}

async fn count_official_builds(
    target: &Target,
    report: &BisectReport,
    fetcher: &Arc<dyn Fetcher>,
    cache: &mut RevListCache,
) -> bisect_builds::error::Result<usize> {
    let mut official = Target::new(BuildType::Official, target.archive.clone())?;
    official.apk = target.apk.clone();
    official.android_sdk = target.android_sdk;
    let backend = create_backend(&official, fetcher.clone())?;
    let good = resolve_endpoint(fetcher.as_ref(), &report.good.to_string(), RevisionKind::CommitPosition).await?;
    let bad = resolve_endpoint(fetcher.as_ref(), &report.bad.to_string(), RevisionKind::CommitPosition).await?;
    let list = list_with_cache(backend.as_ref(), cache, &RetryPolicy::default(), &good, &bad).await?;
    Ok(list.len())
}
