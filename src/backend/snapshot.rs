// Paginated bucket listings: per-commit snapshots and ASAN builds
use super::ArtifactBackend;
use crate::constants;
use crate::descriptor::{DownloadDescriptor, Role};
use crate::error::{BisectError, Result};
use crate::path_context::PathContext;
use crate::remote::Fetcher;
use crate::revision::{Revision, RevisionKind, RevisionList};
use crate::target::BackendVariant;
use async_trait::async_trait;
use quick_xml::events::Event;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").expect("static regex"));

/// One page of a bucket directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub revisions: Vec<u32>,
    /// Set when the listing is truncated and another page follows
    pub next_marker: Option<String>,
}

/// Parses a storage listing page.
///
/// Revisions come from the `CommonPrefixes/Prefix` entries with the root
/// `Prefix` stripped: `Linux_x64/1234/` under prefix `Linux_x64/` is 1234,
/// and `linux-release/asan-symbolized-linux-release-277079.zip` under its
/// basename is 277079.
pub fn parse_listing_page(xml: &str) -> Result<ListingPage> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut root_prefix = String::new();
    let mut truncated = false;
    let mut next_marker = None;
    let mut prefixes = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| BisectError::BackendUnavailable(format!("malformed listing: {}", e)))?;
                let names: Vec<&str> = path.iter().map(String::as_str).collect();
                match names.as_slice() {
                    [_, "Prefix"] => root_prefix = text.into_owned(),
                    [_, "IsTruncated"] => truncated = text.eq_ignore_ascii_case("true"),
                    [_, "NextMarker"] => next_marker = Some(text.into_owned()),
                    [_, "CommonPrefixes", "Prefix"] => prefixes.push(text.into_owned()),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BisectError::BackendUnavailable(format!(
                    "malformed listing at {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    let revisions = prefixes
        .iter()
        .filter_map(|p| p.get(root_prefix.len()..))
        .filter_map(|rest| DIGITS_RE.captures(rest))
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .collect();

    Ok(ListingPage {
        revisions,
        next_marker: if truncated { next_marker } else { None },
    })
}

/// How listing URLs and markers are formed for a paginated bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLayout {
    /// `<base>/?delimiter=/&prefix=<dir>`, one directory per revision
    Snapshot {
        archive: String,
        context: &'static PathContext,
        chromedriver: bool,
    },
    /// `<base>/?delimiter=.zip&prefix=<plat>-release/<basename>`, one zip per revision
    Asan { platform_dir: String, base_name: String },
}

pub struct SnapshotBackend {
    variant: BackendVariant,
    base_url: &'static str,
    layout: SnapshotLayout,
    fetcher: Arc<dyn Fetcher>,
}

impl SnapshotBackend {
    pub fn snapshot(
        variant: BackendVariant,
        archive: &str,
        context: &'static PathContext,
        chromedriver: bool,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        if context.archive_name.is_none() {
            return Err(BisectError::CliUsage(format!("no snapshot archive known for {}", archive)));
        }
        if chromedriver && context.chromedriver_archive_name.is_none() {
            return Err(BisectError::CliUsage(format!(
                "Could not find chromedriver_archive_name, --chromedriver might not be supported on {}.",
                archive
            )));
        }
        Ok(Self {
            variant,
            base_url: constants::CHROMIUM_BASE_URL,
            layout: SnapshotLayout::Snapshot {
                archive: archive.to_string(),
                context,
                chromedriver,
            },
            fetcher,
        })
    }

    /// ASAN builds for `platform` (linux, mac or win).
    pub fn asan(platform: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        // ASAN uploads use "win32" for Windows.
        let platform_dir = if platform == "win" { "win32" } else { platform };
        let base_name = if platform.contains("linux") {
            format!("asan-symbolized-{}-{}", platform_dir, constants::ASAN_BUILD_TYPE)
        } else {
            format!("asan-{}-{}", platform_dir, constants::ASAN_BUILD_TYPE)
        };
        Self {
            variant: BackendVariant::AsanGcs,
            base_url: constants::ASAN_BASE_URL,
            layout: SnapshotLayout::Asan {
                platform_dir: platform_dir.to_string(),
                base_name,
            },
            fetcher,
        }
    }

    pub fn with_base_url(mut self, base_url: &'static str) -> Self {
        self.base_url = base_url;
        self
    }

    fn listing_url(&self, marker: Option<&str>) -> String {
        let query = match &self.layout {
            SnapshotLayout::Snapshot { context, .. } => {
                format!("?delimiter=/&prefix={}", context.listing_platform_dir)
            }
            SnapshotLayout::Asan {
                platform_dir,
                base_name,
            } => format!(
                "?delimiter=.zip&prefix={}-{}/{}",
                platform_dir,
                constants::ASAN_BUILD_TYPE,
                base_name
            ),
        };
        match marker {
            Some(marker) => format!("{}/{}&marker={}", self.base_url, query, marker),
            None => format!("{}/{}", self.base_url, query),
        }
    }

    fn marker_for(&self, revision: u32) -> String {
        match &self.layout {
            SnapshotLayout::Snapshot { context, .. } => {
                format!("{}{}", context.listing_platform_dir, revision)
            }
            SnapshotLayout::Asan {
                platform_dir,
                base_name,
            } => format!(
                "{}-{}/{}-{}.zip",
                platform_dir,
                constants::ASAN_BUILD_TYPE,
                base_name,
                revision
            ),
        }
    }

    fn last_change_url(&self) -> Option<String> {
        match &self.layout {
            SnapshotLayout::Snapshot { context, .. } => Some(format!(
                "{}/{}{}",
                self.base_url,
                context.listing_platform_dir,
                constants::LAST_CHANGE_FILE
            )),
            SnapshotLayout::Asan { .. } => None,
        }
    }

    async fn fetch_page(&self, marker: Option<&str>) -> Result<ListingPage> {
        let url = self.listing_url(marker);
        let body = match self.fetcher.get_text(&url).await {
            Ok(body) => body,
            // A listing page is never "missing"; treat it as a service failure.
            Err(BisectError::ArtifactMissing(url)) => {
                return Err(BisectError::BackendUnavailable(format!("listing {} not found", url)));
            }
            Err(e) => return Err(e),
        };
        parse_listing_page(&body)
    }

    async fn last_change(&self, url: &str) -> Result<u32> {
        let text = self.fetcher.get_text(url).await?;
        text.trim()
            .parse()
            .map_err(|_| BisectError::BackendUnavailable(format!("unexpected LAST_CHANGE {:?}", text.trim())))
    }
}

fn digit_count(n: u32) -> usize {
    n.to_string().len()
}

#[async_trait]
impl ArtifactBackend for SnapshotBackend {
    fn variant(&self) -> BackendVariant {
        self.variant
    }

    fn key(&self) -> String {
        self.listing_url(None)
    }

    fn kind(&self) -> RevisionKind {
        RevisionKind::CommitPosition
    }

    async fn list_revisions(&self, lo: Option<&Revision>, hi: Option<&Revision>) -> Result<RevisionList> {
        let min = lo.and_then(Revision::as_commit_position);
        let mut max = hi.and_then(Revision::as_commit_position);
        if max.is_none()
            && let Some(url) = self.last_change_url()
        {
            max = Some(self.last_change(&url).await?);
        }

        // Keys sort as strings (1, 10, 2, ...), so starting or stopping at a
        // marker is only sound when both bounds have the same digit count.
        let start_marker = match (min, max) {
            (Some(min), Some(max)) if digit_count(min) == digit_count(max) => Some(self.marker_for(min)),
            _ => {
                max = None;
                None
            }
        };

        let mut revisions = Vec::new();
        let mut next_marker = start_marker.clone();
        loop {
            log::info!(
                "Fetching revisions at marker {}",
                next_marker.as_deref().unwrap_or("<start>")
            );
            let page = self.fetch_page(next_marker.as_deref()).await?;
            let page_max = page.revisions.iter().copied().max();
            revisions.extend(page.revisions);
            next_marker = page.next_marker;
            if let (Some(max), Some(page_max)) = (max, page_max)
                && max <= page_max
            {
                break;
            }
            if next_marker.is_none() {
                break;
            }
        }

        // Only a bounded scan needs trimming; a full scan is cached whole.
        let revisions = if start_marker.is_some() || next_marker.is_some() {
            revisions
                .into_iter()
                .filter(|r| min.is_none_or(|min| *r >= min) && max.is_none_or(|max| *r <= max))
                .collect()
        } else {
            revisions
        };
        RevisionList::from_unsorted(RevisionKind::CommitPosition, revisions.into_iter().map(Revision::from))
    }

    async fn latest(&self) -> Result<Revision> {
        match self.last_change_url() {
            Some(url) => Ok(Revision::from(self.last_change(&url).await?)),
            None => {
                let all = self.list_revisions(None, None).await?;
                all.last().cloned().ok_or_else(|| {
                    BisectError::BackendUnavailable(format!("no revisions listed under {}", self.key()))
                })
            }
        }
    }

    fn descriptor(&self, rev: &Revision) -> Result<DownloadDescriptor> {
        let revision = rev.as_commit_position().ok_or_else(|| {
            BisectError::InternalInvariantViolation(format!("{} is not a commit position", rev))
        })?;
        match &self.layout {
            SnapshotLayout::Asan { .. } => {
                DownloadDescriptor::single(format!("{}/{}", self.base_url, self.marker_for(revision)))
            }
            SnapshotLayout::Snapshot {
                archive,
                context,
                chromedriver,
            } => {
                let mut archive_name = context.archive_name.unwrap_or_default();
                // Renamed uploads; older revisions keep the old names.
                if revision < constants::SNAPSHOT_ARCHIVE_RENAME_REVISION {
                    match archive.as_str() {
                        "chromeos" => archive_name = "chrome-linux.zip",
                        "win" | "win64" => archive_name = "chrome-win32.zip",
                        _ => {}
                    }
                }
                let prefix = format!("{}/{}{}/", self.base_url, context.listing_platform_dir, revision);
                let chrome = format!("{}{}", prefix, archive_name);
                match (chromedriver, context.chromedriver_archive_name) {
                    (true, Some(driver)) => DownloadDescriptor::multi([
                        (Role::Chrome, chrome),
                        (Role::Chromedriver, format!("{}{}", prefix, driver)),
                    ]),
                    _ => DownloadDescriptor::single(chrome),
                }
            }
        }
    }
}
