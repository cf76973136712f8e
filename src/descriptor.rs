// Download descriptors and the fetched artifacts that mirror them
use crate::error::{BisectError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A named part of a multi-artifact descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Chrome,
    Chromedriver,
    Trichrome,
    TrichromeLibrary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Chrome => "chrome",
            Role::Chromedriver => "chromedriver",
            Role::Trichrome => "trichrome",
            Role::TrichromeLibrary => "trichrome_library",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL scheme of a descriptor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Gs,
}

/// Checks that `raw` is a URL with an http, https or gs scheme.
pub fn scheme_of(raw: &str) -> Result<Scheme> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| BisectError::InternalInvariantViolation(format!("bad URL {}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" => Ok(Scheme::Http),
        "https" => Ok(Scheme::Https),
        "gs" => Ok(Scheme::Gs),
        other => Err(BisectError::InternalInvariantViolation(format!(
            "unsupported URL scheme {:?} in {}",
            other, raw
        ))),
    }
}

/// The URL(s) needed to fetch one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadDescriptor {
    Single(String),
    Multi(BTreeMap<Role, String>),
}

impl DownloadDescriptor {
    pub fn single(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        scheme_of(&url)?;
        Ok(DownloadDescriptor::Single(url))
    }

    pub fn multi<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Role, String)>,
    {
        let map: BTreeMap<Role, String> = entries.into_iter().collect();
        if map.is_empty() {
            return Err(BisectError::InternalInvariantViolation(
                "empty multi-role descriptor".into(),
            ));
        }
        for url in map.values() {
            scheme_of(url)?;
        }
        Ok(DownloadDescriptor::Multi(map))
    }

    /// Entries as (role, url); a single URL reports `None` for its role.
    pub fn entries(&self) -> Vec<(Option<Role>, &str)> {
        match self {
            DownloadDescriptor::Single(url) => vec![(None, url.as_str())],
            DownloadDescriptor::Multi(map) => {
                map.iter().map(|(role, url)| (Some(*role), url.as_str())).collect()
            }
        }
    }

    pub fn url(&self, role: Role) -> Option<&str> {
        match self {
            DownloadDescriptor::Single(url) if role == Role::Chrome => Some(url),
            DownloadDescriptor::Single(_) => None,
            DownloadDescriptor::Multi(map) => map.get(&role).map(String::as_str),
        }
    }
}

impl fmt::Display for DownloadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadDescriptor::Single(url) => f.write_str(url),
            DownloadDescriptor::Multi(map) => {
                let parts: Vec<String> =
                    map.iter().map(|(role, url)| format!("{}={}", role, url)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Local files for a descriptor, owned by the download job that made them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedArtifacts {
    Single(PathBuf),
    Multi(BTreeMap<Role, PathBuf>),
}

impl FetchedArtifacts {
    /// Path for `role`; a single artifact answers for `Role::Chrome`.
    pub fn get(&self, role: Role) -> Option<&Path> {
        match self {
            FetchedArtifacts::Single(path) if role == Role::Chrome => Some(path),
            FetchedArtifacts::Single(_) => None,
            FetchedArtifacts::Multi(map) => map.get(&role).map(PathBuf::as_path),
        }
    }

    pub fn require(&self, role: Role) -> Result<&Path> {
        self.get(role).ok_or_else(|| {
            BisectError::InternalInvariantViolation(format!("download has no {} artifact", role))
        })
    }

    pub fn paths(&self) -> Vec<&Path> {
        match self {
            FetchedArtifacts::Single(path) => vec![path.as_path()],
            FetchedArtifacts::Multi(map) => map.values().map(PathBuf::as_path).collect(),
        }
    }
}

impl fmt::Display for FetchedArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self.paths().iter().map(|p| p.display().to_string()).collect();
        f.write_str(&paths.join(", "))
    }
}
