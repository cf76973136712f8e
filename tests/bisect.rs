mod common;

use anyhow::Result;
use bisect_builds::bisect::{PrefetchStrategy, steps_left};
use bisect_builds::error::BisectError;
use bisect_builds::revision::Revision;
use bisect_builds::verdict::{RunStatus, Verdict};
use common::{FakeBackend, FakeRunner, Harness, MockFetcher, ScriptedOracle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_snapshot_bisection_finds_boundary() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(100..=10_000))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::monotone(101);

    let report = driver.run(&100.into(), Some(&10_000.into()), &mut oracle).await?;

    assert_eq!(report.good, Revision::from(100));
    assert_eq!(report.bad, Revision::from(101));
    assert!(harness.runner.launch_count() <= 14);
    assert_eq!(report.launches, harness.runner.launch_count());
    Ok(())
}

#[tokio::test]
async fn test_all_bad_collapses_onto_good_endpoint() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(100..=10_000))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::new(|_| Verdict::Bad);

    let report = driver.run(&100.into(), Some(&10_000.into()), &mut oracle).await?;

    assert_eq!((report.good, report.bad), (100.into(), 101.into()));
    assert!(harness.runner.launch_count() <= 14);
    Ok(())
}

#[tokio::test]
async fn test_monotone_oracles_terminate_on_boundary() -> Result<()> {
    let revisions: Vec<u32> = (0..37).map(|i| 5_000 + i * 3).collect();
    let bound = steps_left(revisions.len()) as usize;
    for k in 1..revisions.len() {
        let harness = Harness::new(FakeBackend::new(revisions.clone()))?;
        let mut driver = harness.driver(harness.config());
        let mut oracle = ScriptedOracle::monotone(revisions[k]);

        let first = revisions[0].into();
        let last = revisions[revisions.len() - 1].into();
        let report = driver.run(&first, Some(&last), &mut oracle).await?;

        assert_eq!(report.good, Revision::from(revisions[k - 1]), "boundary {}", k);
        assert_eq!(report.bad, Revision::from(revisions[k]), "boundary {}", k);
        assert!(harness.runner.launch_count() <= bound, "boundary {}", k);
    }
    Ok(())
}

#[tokio::test]
async fn test_launch_bound_scales_with_times() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=64))?;
    let mut config = harness.config();
    config.times = 3;
    let mut driver = harness.driver(config);
    let mut oracle = ScriptedOracle::monotone(40);

    let report = driver.run(&1.into(), Some(&64.into()), &mut oracle).await?;

    assert_eq!((report.good, report.bad), (39.into(), 40.into()));
    assert!(harness.runner.launch_count() <= steps_left(64) as usize * 3);
    assert_eq!(harness.runner.launch_count(), oracle.answers.len() * 3);
    Ok(())
}

#[tokio::test]
async fn test_retry_never_moves_the_window() -> Result<()> {
    // 16 revisions, boundary between indices 2 and 3
    let revisions: Vec<u32> = (0..16).map(|i| 2_000 + i).collect();
    let harness = Harness::new(FakeBackend::new(revisions.clone()))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::monotone(revisions[3]).retry_first();

    let report = driver.run(&2_000.into(), Some(&2_015.into()), &mut oracle).await?;

    assert_eq!(report.good, Revision::from(revisions[2]));
    assert_eq!(report.bad, Revision::from(revisions[3]));

    // every revision was shown twice in a row: retry, then the real answer
    assert_eq!(oracle.answers.len() % 2, 0);
    for pair in oracle.answers.chunks(2) {
        assert_eq!(pair[0].0, pair[1].0);
        assert_eq!(pair[0].1, Verdict::Retry);
        assert_ne!(pair[1].1, Verdict::Retry);
    }
    assert_eq!(harness.runner.launch_count(), oracle.answers.len());
    Ok(())
}

#[tokio::test]
async fn test_unknown_drops_exactly_one_candidate() -> Result<()> {
    // 10 revisions, boundary between indices 7 and 8
    let revisions: Vec<u32> = (0..10).map(|i| 100 + i * 10).collect();
    let harness = Harness::new(FakeBackend::new(revisions.clone()))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle =
        ScriptedOracle::monotone(revisions[8]).with_script([Verdict::Unknown, Verdict::Unknown]);

    let report = driver.run(&100.into(), Some(&190.into()), &mut oracle).await?;

    assert_eq!(report.good, Revision::from(revisions[7]));
    assert_eq!(report.bad, Revision::from(revisions[8]));

    let unknown: Vec<u32> = oracle
        .answers
        .iter()
        .filter(|(_, v)| *v == Verdict::Unknown)
        .map(|(r, _)| *r)
        .collect();
    assert_eq!(unknown, vec![140, 150]);
    for rev in &unknown {
        assert_ne!(report.good, Revision::from(*rev));
        assert_ne!(report.bad, Revision::from(*rev));
    }
    let skipped: Vec<&Revision> = report.skipped().collect();
    assert_eq!(skipped.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_reversed_endpoints_keep_orientation() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(200..=1_000))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::new(|r| if r > 500 { Verdict::Good } else { Verdict::Bad });

    let report = driver.run(&1_000.into(), Some(&200.into()), &mut oracle).await?;

    assert_eq!(report.good, Revision::from(501));
    assert_eq!(report.bad, Revision::from(500));
    assert!(report.done_message().contains("500 (known bad)"));
    Ok(())
}

#[tokio::test]
async fn test_quit_stops_every_job() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=1_000))?
        .with_fetcher(MockFetcher::new().with_delay(Duration::from_millis(20)));
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::new(|_| Verdict::Quit);

    let result = driver.run(&1.into(), Some(&1_000.into()), &mut oracle).await;

    assert!(matches!(result, Err(BisectError::UserQuit)));
    assert_eq!(oracle.answers.len(), 1);
    assert!(harness.leftovers().is_empty(), "leftovers: {:?}", harness.leftovers());
    Ok(())
}

#[tokio::test]
async fn test_no_temp_files_after_success() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=300))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::monotone(77);

    driver.run(&1.into(), Some(&300.into()), &mut oracle).await?;

    assert!(harness.leftovers().is_empty(), "leftovers: {:?}", harness.leftovers());
    let scratch = harness.runner.scratch_dirs();
    assert_eq!(scratch.len(), oracle.answers.len());
    assert!(scratch.iter().all(|dir| !dir.exists()));
    Ok(())
}

#[tokio::test]
async fn test_missing_artifact_is_skipped() -> Result<()> {
    // first midpoint of 1..=9 is 5
    let harness = Harness::new(FakeBackend::new(1..=9).with_missing([5]))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::monotone(7);

    let report = driver.run(&1.into(), Some(&9.into()), &mut oracle).await?;

    assert_eq!(report.good, Revision::from(6));
    assert_eq!(report.bad, Revision::from(7));
    assert!(!oracle.asked().contains(&5));
    let skipped: Vec<&Revision> = report.skipped().collect();
    assert_eq!(skipped, vec![&Revision::from(5)]);
    assert!(harness.leftovers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_good_prefetch_is_reused() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=1_024))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::new(|_| Verdict::Good);

    let report = driver.run(&1.into(), Some(&1_024.into()), &mut oracle).await?;

    assert_eq!((report.good, report.bad), (1_023.into(), 1_024.into()));
    // each prefetched build was the next one tested
    assert_eq!(harness.fetcher.download_count(), oracle.answers.len());
    Ok(())
}

#[tokio::test]
async fn test_bad_prefetch_strategy() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=1_024))?;
    let mut config = harness.config();
    config.prefetch = PrefetchStrategy::AssumeBad;
    let mut driver = harness.driver(config);
    let mut oracle = ScriptedOracle::new(|_| Verdict::Bad);

    let report = driver.run(&1.into(), Some(&1_024.into()), &mut oracle).await?;

    assert_eq!((report.good, report.bad), (1.into(), 2.into()));
    assert_eq!(harness.fetcher.download_count(), oracle.answers.len());
    Ok(())
}

#[tokio::test]
async fn test_at_most_two_downloads_in_flight() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=512))?
        .with_fetcher(MockFetcher::new().with_delay(Duration::from_millis(5)));
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::monotone(300);

    driver.run(&1.into(), Some(&512.into()), &mut oracle).await?;

    assert!(harness.fetcher.max_concurrent() <= 2);
    Ok(())
}

#[tokio::test]
async fn test_latest_used_when_bad_omitted() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(10..=50))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::new(|_| Verdict::Good);

    let report = driver.run(&10.into(), None, &mut oracle).await?;

    assert_eq!(report.bad, Revision::from(50));
    Ok(())
}

#[tokio::test]
async fn test_verify_range_rejects_inconsistent_endpoints() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=100))?;
    let mut config = harness.config();
    config.verify_range = true;
    let mut driver = harness.driver(config);
    // the good endpoint reproduces the bug
    let mut oracle = ScriptedOracle::new(|_| Verdict::Bad);

    let result = driver.run(&1.into(), Some(&100.into()), &mut oracle).await;

    match result {
        Err(BisectError::RangeVerification { revision, .. }) => assert_eq!(revision, "1"),
        other => panic!("expected range verification failure, got {:?}", other.map(|r| r.good)),
    }
    assert!(harness.leftovers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_verify_range_then_bisect() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=100))?;
    let mut config = harness.config();
    config.verify_range = true;
    let mut driver = harness.driver(config);
    let mut oracle = ScriptedOracle::monotone(42);

    let report = driver.run(&1.into(), Some(&100.into()), &mut oracle).await?;

    assert_eq!(&oracle.asked()[..2], &[1, 100]);
    assert_eq!((report.good, report.bad), (41.into(), 42.into()));
    Ok(())
}

#[tokio::test]
async fn test_empty_window_is_reported() -> Result<()> {
    let harness = Harness::new(FakeBackend::new([10, 500]))?;
    let mut driver = harness.driver(harness.config());
    let mut oracle = ScriptedOracle::monotone(100);

    let result = driver.run(&20.into(), Some(&400.into()), &mut oracle).await;

    assert!(matches!(result, Err(BisectError::EmptyRevisionRange { found: 0, .. })));
    assert_eq!(harness.runner.launch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_exit_stops_repeated_launches() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=100))?.with_runner(FakeRunner::exiting(1));
    let mut config = harness.config();
    config.times = 3;
    let mut driver = harness.driver(config);
    let mut oracle = ScriptedOracle::new(|_| Verdict::Bad);

    let report = driver.run(&1.into(), Some(&100.into()), &mut oracle).await?;

    // one launch per revision: the first non-zero exit ends the repeats
    assert_eq!(harness.runner.launch_count(), oracle.answers.len());
    assert_eq!(report.launches, oracle.answers.len());
    assert!(
        oracle
            .shown
            .iter()
            .all(|shown| shown == &(RunStatus::Exited(1), Some(Verdict::Bad)))
    );
    assert_eq!((report.good, report.bad), (1.into(), 2.into()));
    Ok(())
}

#[tokio::test]
async fn test_launch_timeout_proposes_unknown() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=100))?.with_runner(FakeRunner::timing_out());
    let mut config = harness.config();
    config.times = 2;
    let mut driver = harness.driver(config);
    let mut oracle = ScriptedOracle::monotone(42);

    let report = driver.run(&1.into(), Some(&100.into()), &mut oracle).await?;

    assert!(!oracle.shown.is_empty());
    assert!(
        oracle
            .shown
            .iter()
            .all(|shown| shown == &(RunStatus::Timeout, Some(Verdict::Unknown)))
    );
    assert_eq!(harness.runner.launch_count(), oracle.answers.len());
    assert!(
        report
            .history
            .iter()
            .all(|entry| entry.status == Some(RunStatus::Timeout))
    );
    Ok(())
}

#[tokio::test]
async fn test_interrupt_during_download_stops_jobs() -> Result<()> {
    let harness = Harness::new(FakeBackend::new(1..=100))?
        .with_fetcher(MockFetcher::new().with_delay(Duration::from_secs(60)));
    let token = CancellationToken::new();
    let mut driver = harness.driver(harness.config()).with_interrupt(token.clone());
    let mut oracle = ScriptedOracle::monotone(42);
    token.cancel();

    let result = driver.run(&1.into(), Some(&100.into()), &mut oracle).await;

    assert!(matches!(result, Err(BisectError::Interrupted)));
    assert_eq!(harness.runner.launch_count(), 0);
    assert!(oracle.answers.is_empty());
    assert!(harness.leftovers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_interrupt_during_launch_uninstalls() -> Result<()> {
    let token = CancellationToken::new();
    let harness =
        Harness::new(FakeBackend::new(1..=100))?.with_runner(FakeRunner::interrupting(token.clone()));
    let mut driver = harness.driver(harness.config()).with_interrupt(token);
    let mut oracle = ScriptedOracle::monotone(42);

    let result = driver.run(&1.into(), Some(&100.into()), &mut oracle).await;

    assert!(matches!(result, Err(BisectError::Interrupted)));
    assert_eq!(harness.runner.launch_count(), 1);
    assert_eq!(harness.runner.uninstall_count(), 1);
    assert!(oracle.answers.is_empty());
    // the running prefetch and the scratch dir are gone too
    assert!(harness.leftovers().is_empty());
    Ok(())
}
