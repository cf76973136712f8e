// Symbolic endpoints: versions and milestones resolved to commit positions
use crate::constants;
use crate::error::{BisectError, Result};
use crate::remote::Fetcher;
use crate::revision::{Revision, RevisionKind, Version};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FULL_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+$").expect("valid regex"));

static MILESTONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[Mm](\d+)$").expect("valid regex"));

// Footer gitiles commit messages end with, e.g. `Cr-Commit-Position: refs/heads/main@{#1015352}`.
static COMMIT_POSITION_FOOTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)refs/heads/\w+@\{#(\d+)\}$").expect("valid regex"));

/// Turns a `-g`/`-b` value into a revision of `kind`.
///
/// Commit-position builds also accept a full version (`112.0.5615.0`) or a
/// milestone (`M112`), which are looked up on chromiumdash and gitiles.
pub async fn resolve_endpoint(fetcher: &dyn Fetcher, text: &str, kind: RevisionKind) -> Result<Revision> {
    let text = text.trim();
    if kind == RevisionKind::Version {
        return Revision::parse(text, kind);
    }
    if let Ok(pos) = text.parse::<u32>() {
        return Ok(Revision::CommitPosition(pos));
    }
    if FULL_VERSION.is_match(text) {
        let version = Version::parse(text)?;
        let pos = position_for_version(fetcher, &version).await?;
        log::info!("Resolved {} to commit position {}", version, pos);
        return Ok(Revision::CommitPosition(pos));
    }
    if let Some(caps) = MILESTONE.captures(text) {
        let milestone: u32 = caps[1]
            .parse()
            .map_err(|_| BisectError::InvalidRevision(text.to_string()))?;
        let pos = position_for_milestone(fetcher, milestone).await?;
        log::info!("Resolved M{} to commit position {}", milestone, pos);
        return Ok(Revision::CommitPosition(pos));
    }
    Err(BisectError::InvalidRevision(text.to_string()))
}

async fn position_for_version(fetcher: &dyn Fetcher, version: &Version) -> Result<u32> {
    let mut info = fetch_json(fetcher, &constants::version_info_url(&version.to_string())).await?;
    if is_empty(&info) {
        // Unreleased patch versions are only known through their branch point.
        let base = version.branch_base();
        info = fetch_json(fetcher, &constants::version_info_url(&base.to_string())).await?;
    }
    if let Some(pos) = info.as_ref().and_then(|v| main_branch_position(v)) {
        return Ok(pos);
    }

    let tag = version.to_string();
    if let Some(pos) = position_from_source_tag(fetcher, &tag).await? {
        return Ok(pos);
    }
    // Tags on release branches point at a commit without the footer; its
    // parent on main carries one.
    if let Some(pos) = position_from_source_tag(fetcher, &format!("{}^", tag)).await? {
        return Ok(pos);
    }
    Err(BisectError::InvalidRevision(format!(
        "Can not find revision for {} from chromiumdash and source",
        version
    )))
}

async fn position_for_milestone(fetcher: &dyn Fetcher, milestone: u32) -> Result<u32> {
    let milestones = fetch_json(fetcher, &constants::milestones_url(milestone)).await?;
    let found = milestones
        .as_ref()
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|entry| entry.get("milestone").and_then(Value::as_u64) == Some(u64::from(milestone)))
        .find_map(main_branch_position);
    found.ok_or_else(|| BisectError::InvalidRevision(format!("Can not find revision for milestone {}", milestone)))
}

async fn position_from_source_tag(fetcher: &dyn Fetcher, tag: &str) -> Result<Option<u32>> {
    let Some(commit) = fetch_json(fetcher, &constants::source_tag_url(tag)).await? else {
        return Ok(None);
    };
    let message = commit.get("message").and_then(Value::as_str).unwrap_or_default();
    Ok(COMMIT_POSITION_FOOTER
        .captures_iter(message)
        .last()
        .and_then(|caps| caps[1].parse().ok()))
}

fn main_branch_position(value: &Value) -> Option<u32> {
    let pos = value.get("chromium_main_branch_position")?;
    pos.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .or_else(|| pos.as_str().and_then(|s| s.parse().ok()))
}

fn is_empty(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// GETs `url` and parses it as JSON; a missing page reads as `None`.
async fn fetch_json(fetcher: &dyn Fetcher, url: &str) -> Result<Option<Value>> {
    let body = match fetcher.get_text(url).await {
        Ok(body) => body,
        Err(BisectError::ArtifactMissing(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let body = strip_xssi(&body);
    if body.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(body)?))
}

fn strip_xssi(body: &str) -> &str {
    body.strip_prefix(constants::XSSI_PREFIX)
        .or_else(|| body.strip_prefix(")]}'"))
        .unwrap_or(body)
}
