// Release buckets keyed by version, probed per platform artifact
use super::ArtifactBackend;
use crate::constants;
use crate::descriptor::{DownloadDescriptor, Role};
use crate::error::{BisectError, Result};
use crate::path_context::TrichromeNames;
use crate::remote::Fetcher;
use crate::revision::{Revision, RevisionKind, RevisionList, Version};
use crate::target::BackendVariant;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d\.\d{4}\.\d+)").expect("static regex"));

/// Where the artifacts of one version live inside a release bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseLayout {
    /// `<bucket>/<version>/<dir>/<archive>`
    Desktop {
        platform_dir: &'static str,
        archive_name: &'static str,
        chromedriver_archive: Option<&'static str>,
    },
    /// `<bucket>/<version>/<dir>/<apk>`
    Android {
        platform_dir: &'static str,
        apk_filename: &'static str,
    },
    /// Library plus base bundle; `legacy` names apply before M112.
    Trichrome {
        platform_dir: &'static str,
        current: TrichromeNames,
        legacy: TrichromeNames,
    },
    /// `<bucket>/<version>/*/<dir>/*/<ipa>`
    Ios { platform_dir: &'static str, ipa: String },
    /// `<bucket>/<version>/*/<archive>`
    IosSimulator { archive_name: &'static str },
}

pub struct ReleaseBackend {
    variant: BackendVariant,
    bucket: &'static str,
    layout: ReleaseLayout,
    fetcher: Arc<dyn Fetcher>,
}

impl ReleaseBackend {
    pub fn new(
        variant: BackendVariant,
        bucket: &'static str,
        layout: ReleaseLayout,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            variant,
            bucket,
            layout,
            fetcher,
        }
    }

    fn archive_path(&self, build: &str, name: &str) -> String {
        match &self.layout {
            ReleaseLayout::Desktop { platform_dir, .. }
            | ReleaseLayout::Android { platform_dir, .. }
            | ReleaseLayout::Trichrome { platform_dir, .. } => format!(
                "{}/{}/{}/{}",
                self.bucket,
                build,
                platform_dir.trim_end_matches('/'),
                name
            ),
            // The builder and SDK directories are unknowable; one match is expected.
            ReleaseLayout::Ios { platform_dir, .. } => format!(
                "{}/{}/*/{}/*/{}",
                self.bucket,
                build,
                platform_dir.trim_end_matches('/'),
                name
            ),
            ReleaseLayout::IosSimulator { .. } => format!("{}/{}/*/{}", self.bucket, build, name),
        }
    }

    fn trichrome_names<'a>(current: &'a TrichromeNames, legacy: &'a TrichromeNames, version: &Version) -> &'a TrichromeNames {
        if version.milestone() >= constants::TRICHROME_64BIT_MIN_MILESTONE {
            current
        } else {
            legacy
        }
    }

    /// Files that must all exist for `version` to count as available.
    fn required_files(&self, version: &Version) -> Vec<String> {
        match &self.layout {
            ReleaseLayout::Desktop { archive_name, .. } => vec![archive_name.to_string()],
            ReleaseLayout::Android { apk_filename, .. } => vec![apk_filename.to_string()],
            ReleaseLayout::Trichrome { current, legacy, .. } => {
                let names = Self::trichrome_names(current, legacy, version);
                vec![names.apks.to_string(), names.library.to_string()]
            }
            ReleaseLayout::Ios { ipa, .. } => vec![ipa.clone()],
            ReleaseLayout::IosSimulator { archive_name } => vec![archive_name.to_string()],
        }
    }

    fn primary_file(&self) -> &str {
        match &self.layout {
            ReleaseLayout::Desktop { archive_name, .. } => archive_name,
            ReleaseLayout::Android { apk_filename, .. } => apk_filename,
            ReleaseLayout::Trichrome { current, .. } => current.apks,
            ReleaseLayout::Ios { ipa, .. } => ipa,
            ReleaseLayout::IosSimulator { archive_name } => archive_name,
        }
    }

    /// Every version directory in the bucket within `[lo, hi]`.
    async fn candidate_versions(&self, lo: Option<&Version>, hi: Option<&Version>) -> Result<Vec<Version>> {
        let paths = self.fetcher.gs_list(&[self.bucket.to_string()], false).await?;
        let versions: BTreeSet<Version> = paths
            .iter()
            .filter_map(|path| VERSION_RE.captures(path))
            .filter_map(|caps| Version::parse(&caps[1]).ok())
            .filter(|v| lo.is_none_or(|lo| v >= lo) && hi.is_none_or(|hi| v <= hi))
            .collect();
        Ok(versions.into_iter().collect())
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl ArtifactBackend for ReleaseBackend {
    fn variant(&self) -> BackendVariant {
        self.variant
    }

    fn key(&self) -> String {
        self.archive_path("**", self.primary_file())
    }

    fn kind(&self) -> RevisionKind {
        RevisionKind::Version
    }

    async fn list_revisions(&self, lo: Option<&Revision>, hi: Option<&Revision>) -> Result<RevisionList> {
        // Android buckets are too large to list without both bounds.
        if self.variant.is_android() && (lo.is_none() || hi.is_none()) {
            return Err(BisectError::CliUsage(format!(
                "Could not find enough revisions for Android {} release channel; both -g and -b are required.",
                self.primary_file()
            )));
        }
        let lo = lo.and_then(Revision::as_version);
        let hi = hi.and_then(Revision::as_version);
        let candidates = self.candidate_versions(lo, hi).await?;

        let mut found = Vec::new();
        for batch in candidates.chunks(constants::RELEASE_PROBE_BATCH_SIZE) {
            log::info!("Fetching revisions at marker {}", batch[0]);
            let mut probes = Vec::new();
            for version in batch {
                for name in self.required_files(version) {
                    probes.push(self.archive_path(&version.to_string(), &name));
                }
            }
            // Missing paths make gsutil fail; whatever it did list is still valid.
            let listed = self.fetcher.gs_list(&probes, true).await?;
            let mut present: BTreeMap<Version, BTreeSet<String>> = BTreeMap::new();
            for path in &listed {
                if let Some(caps) = VERSION_RE.captures(path)
                    && let Ok(version) = Version::parse(&caps[1])
                {
                    present
                        .entry(version)
                        .or_default()
                        .insert(file_name(path).to_string());
                }
            }
            for version in batch {
                let files = present.get(version);
                let complete = self
                    .required_files(version)
                    .iter()
                    .all(|name| files.is_some_and(|f| f.contains(name)));
                if complete {
                    found.push(Revision::Version(*version));
                }
            }
        }
        RevisionList::from_unsorted(RevisionKind::Version, found)
    }

    fn descriptor(&self, rev: &Revision) -> Result<DownloadDescriptor> {
        let version = rev
            .as_version()
            .ok_or_else(|| BisectError::InternalInvariantViolation(format!("{} is not a version", rev)))?;
        let build = version.to_string();
        match &self.layout {
            ReleaseLayout::Desktop {
                archive_name,
                chromedriver_archive: Some(driver),
                ..
            } => DownloadDescriptor::multi([
                (Role::Chrome, self.archive_path(&build, archive_name)),
                (Role::Chromedriver, self.archive_path(&build, driver)),
            ]),
            ReleaseLayout::Trichrome { current, legacy, .. } => {
                let names = Self::trichrome_names(current, legacy, version);
                DownloadDescriptor::multi([
                    (Role::Trichrome, self.archive_path(&build, names.apks)),
                    (Role::TrichromeLibrary, self.archive_path(&build, names.library)),
                ])
            }
            _ => DownloadDescriptor::single(self.archive_path(&build, self.primary_file())),
        }
    }
}
