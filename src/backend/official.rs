// Official perf builder archives, one zip per commit position
use super::ArtifactBackend;
use crate::constants;
use crate::descriptor::DownloadDescriptor;
use crate::error::{BisectError, Result};
use crate::path_context::PathContext;
use crate::remote::Fetcher;
use crate::revision::{Revision, RevisionKind, RevisionList};
use crate::target::BackendVariant;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

pub struct OfficialBackend {
    variant: BackendVariant,
    platform_dir: &'static str,
    extract_dir: &'static str,
    revision_re: Regex,
    fetcher: Arc<dyn Fetcher>,
}

impl OfficialBackend {
    pub fn new(variant: BackendVariant, context: &'static PathContext, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let extract_dir = context.archive_extract_dir.ok_or_else(|| {
            BisectError::InternalInvariantViolation("official layout without an extract dir".to_string())
        })?;
        let revision_re = Regex::new(&format!(r"{}_(\d+)\.zip", regex::escape(extract_dir)))
            .map_err(|e| BisectError::InternalInvariantViolation(e.to_string()))?;
        Ok(Self {
            variant,
            platform_dir: context.listing_platform_dir,
            extract_dir,
            revision_re,
            fetcher,
        })
    }

    fn listing_url(&self) -> String {
        format!("{}/{}", constants::PERF_BASE_URL, self.platform_dir)
    }
}

#[async_trait]
impl ArtifactBackend for OfficialBackend {
    fn variant(&self) -> BackendVariant {
        self.variant
    }

    fn key(&self) -> String {
        self.listing_url()
    }

    fn kind(&self) -> RevisionKind {
        RevisionKind::CommitPosition
    }

    /// The whole listing is cheap, so it is always returned in full for caching.
    async fn list_revisions(&self, _lo: Option<&Revision>, _hi: Option<&Revision>) -> Result<RevisionList> {
        let paths = self.fetcher.gs_list(&[self.listing_url()], false).await?;
        let revisions = paths
            .iter()
            .filter_map(|path| self.revision_re.captures(path))
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .map(Revision::from);
        RevisionList::from_unsorted(RevisionKind::CommitPosition, revisions)
    }

    fn descriptor(&self, rev: &Revision) -> Result<DownloadDescriptor> {
        let revision = rev.as_commit_position().ok_or_else(|| {
            BisectError::InternalInvariantViolation(format!("{} is not a commit position", rev))
        })?;
        // chromedriver ships inside the same zip.
        DownloadDescriptor::single(format!(
            "{}/{}{}_{}.zip",
            constants::PERF_BASE_URL,
            self.platform_dir,
            self.extract_dir,
            revision
        ))
    }
}
