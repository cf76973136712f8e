// Artifact backends: where builds of one flavor live and how to list them
//
// Every backend answers three questions for its bucket layout: which
// revisions exist in a range, what the newest one is, and which URLs make
// up the download of a revision.

mod official;
mod release;
mod snapshot;

pub use official::OfficialBackend;
pub use release::{ReleaseBackend, ReleaseLayout};
pub use snapshot::{ListingPage, SnapshotBackend, SnapshotLayout, parse_listing_page};

use crate::cache::RevListCache;
use crate::constants;
use crate::descriptor::DownloadDescriptor;
use crate::error::{BisectError, Result};
use crate::path_context;
use crate::remote::Fetcher;
use crate::retry::RetryPolicy;
use crate::revision::{Revision, RevisionKind, RevisionList};
use crate::target::{BackendVariant, Target};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

#[async_trait]
pub trait ArtifactBackend: Send + Sync {
    fn variant(&self) -> BackendVariant;

    /// Stable cache key for this bucket, platform and flavor.
    fn key(&self) -> String;

    /// Ordering of this backend's revisions.
    fn kind(&self) -> RevisionKind;

    /// Revisions known to the backend within `[lo, hi]`. Either bound may be
    /// open. Implementations may return extra revisions outside the range.
    async fn list_revisions(&self, lo: Option<&Revision>, hi: Option<&Revision>) -> Result<RevisionList>;

    /// Newest revision, used when no bad endpoint is given.
    async fn latest(&self) -> Result<Revision> {
        let all = self.list_revisions(None, None).await?;
        all.last().cloned().ok_or_else(|| {
            BisectError::BackendUnavailable(format!("no revisions listed under {}", self.key()))
        })
    }

    /// URLs to fetch for `rev`.
    fn descriptor(&self, rev: &Revision) -> Result<DownloadDescriptor>;
}

/// Builds the backend for `target`, following the flag priority already
/// folded into its build type.
pub fn create_backend(target: &Target, fetcher: Arc<dyn Fetcher>) -> Result<Arc<dyn ArtifactBackend>> {
    let variant = target.variant();
    log::debug!("Selected backend {} for {}", variant, target.archive);
    let backend: Arc<dyn ArtifactBackend> = match variant {
        BackendVariant::SnapshotHttp | BackendVariant::AndroidSnapshot => Arc::new(SnapshotBackend::snapshot(
            variant,
            &target.archive,
            target.context,
            target.chromedriver,
            fetcher,
        )?),
        BackendVariant::AsanGcs => Arc::new(SnapshotBackend::asan(&target.archive, fetcher)),
        BackendVariant::OfficialGcs | BackendVariant::AndroidOfficial => {
            Arc::new(OfficialBackend::new(variant, target.context, fetcher)?)
        }
        BackendVariant::AndroidTrichromeOfficial => {
            check_trichrome_sdk(target)?;
            Arc::new(OfficialBackend::new(variant, target.context, fetcher)?)
        }
        BackendVariant::ReleaseGcs => {
            let archive_name = target.context.archive_name.ok_or_else(|| {
                BisectError::CliUsage(format!("no release archive known for {}", target.archive))
            })?;
            let chromedriver = if target.chromedriver {
                Some(chromedriver_archive(target)?)
            } else {
                None
            };
            Arc::new(ReleaseBackend::new(
                variant,
                constants::RELEASE_BASE_URL,
                ReleaseLayout::Desktop {
                    platform_dir: target.context.listing_platform_dir,
                    archive_name,
                    chromedriver_archive: chromedriver,
                },
                fetcher,
            ))
        }
        BackendVariant::AndroidReleaseGcs => {
            let apk = path_context::apk_filename(&target.apk, target.require_sdk()?)?;
            Arc::new(ReleaseBackend::new(
                variant,
                android_bucket(target.signed),
                ReleaseLayout::Android {
                    platform_dir: target.context.listing_platform_dir,
                    apk_filename: apk,
                },
                fetcher,
            ))
        }
        BackendVariant::AndroidTrichromeRelease => {
            check_trichrome_sdk(target)?;
            if target.apk == "chrome" && target.archive == "android-arm64-high" {
                return Err(BisectError::CliUsage(format!(
                    "chrome debug build is not supported for {}",
                    target.archive
                )));
            }
            Arc::new(ReleaseBackend::new(
                variant,
                android_bucket(target.signed),
                ReleaseLayout::Trichrome {
                    platform_dir: target.context.listing_platform_dir,
                    current: path_context::trichrome_names(&target.apk, &target.archive, true)?,
                    legacy: path_context::trichrome_names(&target.apk, &target.archive, false)?,
                },
                fetcher,
            ))
        }
        BackendVariant::IosRelease => {
            if !target.signed {
                log::warn!("--signed is recommended for iOS release builds");
            }
            let bucket = if target.signed {
                constants::IOS_RELEASE_BASE_URL_SIGNED
            } else {
                constants::IOS_RELEASE_BASE_URL
            };
            Arc::new(ReleaseBackend::new(
                variant,
                bucket,
                ReleaseLayout::Ios {
                    platform_dir: target.context.listing_platform_dir,
                    ipa: format!("{}.ipa", target.ipa_stem()),
                },
                fetcher,
            ))
        }
        BackendVariant::IosSimulator => {
            let archive_name = target.context.archive_name.ok_or_else(|| {
                BisectError::CliUsage("no simulator archive known".to_string())
            })?;
            Arc::new(ReleaseBackend::new(
                variant,
                constants::IOS_ARCHIVE_BASE_URL,
                ReleaseLayout::IosSimulator { archive_name },
                fetcher,
            ))
        }
    };
    Ok(backend)
}

fn android_bucket(signed: bool) -> &'static str {
    if signed {
        constants::ANDROID_RELEASE_BASE_URL_SIGNED
    } else {
        constants::ANDROID_RELEASE_BASE_URL
    }
}

fn check_trichrome_sdk(target: &Target) -> Result<()> {
    if target.require_sdk()? < constants::SDK_Q {
        return Err(BisectError::CliUsage(
            "Trichrome is only supported after Android Q.".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn chromedriver_archive(target: &Target) -> Result<&'static str> {
    target.context.chromedriver_archive_name.ok_or_else(|| {
        BisectError::CliUsage(format!(
            "Could not find chromedriver_archive_name, --chromedriver might not be supported on {}.",
            target.archive
        ))
    })
}

// ============================================================================
// Cached listing
// ============================================================================

/// Lists the revisions between `good` and `bad` (inclusive), consulting
/// `cache` first and asking the backend only for the end segments the cache
/// does not cover. Fails with `EmptyRevisionRange` when fewer than two
/// revisions are available in the window.
pub async fn list_with_cache(
    backend: &dyn ArtifactBackend,
    cache: &mut RevListCache,
    retry: &RetryPolicy,
    good: &Revision,
    bad: &Revision,
) -> Result<RevisionList> {
    let (min, max) = match good.checked_cmp(bad)? {
        Ordering::Less => (good, bad),
        Ordering::Greater => (bad, good),
        Ordering::Equal => {
            return Err(BisectError::CliUsage(format!(
                "good and bad revisions are both {}",
                good
            )));
        }
    };
    let key = backend.key();
    let kind = backend.kind();

    let mut all = cache.get(&key, kind);
    let mut fetched = RevisionList::new(kind);
    let mut queried = false;
    match (all.first().cloned(), all.last().cloned()) {
        (Some(first), Some(last)) => {
            log::info!("Loaded revisions {}-{} from cache", first, last);
            if *min < first {
                fetched.merge(&fetch_segment(backend, retry, min, &first).await?)?;
                queried = true;
            }
            if *max > last {
                fetched.merge(&fetch_segment(backend, retry, &last, max).await?)?;
                queried = true;
            }
        }
        _ => {
            fetched = fetch_segment(backend, retry, min, max).await?;
            queried = true;
        }
    }

    // Rewritten after every backend query, even one that found nothing new.
    if queried {
        all.merge(&fetched)?;
        match cache.save(&key, &all) {
            Ok(merged) => all = merged,
            Err(e) => log::warn!("Save revisions cache error: {}", e),
        }
    }

    let in_range = all.range(Some(min), Some(max));
    if in_range.len() < 2 {
        if let (Some(first), Some(last)) = (all.first(), all.last()) {
            if max < first {
                log::warn!("First available bisect revision for {} is {}", key, first);
            } else if min > last {
                log::warn!("Last available bisect revision for {} is {}", key, last);
            }
        }
        return Err(BisectError::EmptyRevisionRange {
            good: good.to_string(),
            bad: bad.to_string(),
            key,
            found: in_range.len(),
        });
    }
    Ok(in_range)
}

async fn fetch_segment(
    backend: &dyn ArtifactBackend,
    retry: &RetryPolicy,
    lo: &Revision,
    hi: &Revision,
) -> Result<RevisionList> {
    log::debug!("Listing {} revisions {}..{}", backend.variant(), lo, hi);
    retry
        .run("revision listing", || backend.list_revisions(Some(lo), Some(hi)))
        .await
}
