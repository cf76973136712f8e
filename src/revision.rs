// Revision identifiers and their total order
//
// Two kinds exist: integer commit positions and dotted release versions.
// A backend fixes the kind for the whole run; lists never mix them.

use crate::constants;
use crate::error::{BisectError, Result};
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+){0,3}$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionKind {
    CommitPosition,
    Version,
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionKind::CommitPosition => write!(f, "commit position"),
            RevisionKind::Version => write!(f, "version"),
        }
    }
}

/// Dotted version of up to four components.
///
/// Missing trailing components compare as zero, so `85` == `85.0.0.0`.
/// Display keeps the component count the version was parsed with.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    parts: [u32; 4],
    len: u8,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        if !VERSION_RE.is_match(s) {
            return Err(BisectError::InvalidRevision(s.to_string()));
        }
        let mut parts = [0u32; 4];
        let mut len = 0u8;
        for (i, component) in s.split('.').enumerate() {
            parts[i] = component
                .parse()
                .map_err(|_| BisectError::InvalidRevision(s.to_string()))?;
            len += 1;
        }
        Ok(Self { parts, len })
    }

    pub fn components(&self) -> &[u32] {
        &self.parts[..self.len as usize]
    }

    /// Major version (the milestone)
    pub fn milestone(&self) -> u32 {
        self.parts[0]
    }

    /// Same version with its last component set to 0 (e.g. 127.0.6533.88 -> 127.0.6533.0)
    pub fn branch_base(&self) -> Self {
        let mut base = *self;
        if base.len > 0 {
            base.parts[base.len as usize - 1] = 0;
        }
        base
    }

    /// True for full four-component versions such as 85.0.4183.0
    pub fn is_full(&self) -> bool {
        self.len == 4
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.components().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = BisectError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

/// A single build identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Revision {
    CommitPosition(u32),
    Version(Version),
}

impl Revision {
    /// Parses `s` according to `kind`.
    pub fn parse(s: &str, kind: RevisionKind) -> Result<Self> {
        let s = s.trim();
        match kind {
            RevisionKind::CommitPosition => s
                .parse::<u32>()
                .map(Revision::CommitPosition)
                .map_err(|_| BisectError::InvalidRevision(s.to_string())),
            RevisionKind::Version => Version::parse(s).map(Revision::Version),
        }
    }

    pub fn kind(&self) -> RevisionKind {
        match self {
            Revision::CommitPosition(_) => RevisionKind::CommitPosition,
            Revision::Version(_) => RevisionKind::Version,
        }
    }

    pub fn as_commit_position(&self) -> Option<u32> {
        match self {
            Revision::CommitPosition(pos) => Some(*pos),
            Revision::Version(_) => None,
        }
    }

    pub fn as_version(&self) -> Option<&Version> {
        match self {
            Revision::Version(v) => Some(v),
            Revision::CommitPosition(_) => None,
        }
    }

    /// Comparison that refuses to order revisions of different kinds.
    pub fn checked_cmp(&self, other: &Revision) -> Result<Ordering> {
        match (self, other) {
            (Revision::CommitPosition(a), Revision::CommitPosition(b)) => Ok(a.cmp(b)),
            (Revision::Version(a), Revision::Version(b)) => Ok(a.cmp(b)),
            _ => Err(BisectError::InternalInvariantViolation(format!(
                "cannot compare {} {} with {} {}",
                self.kind(),
                self,
                other.kind(),
                other
            ))),
        }
    }

    /// Decodes a cache entry: numbers for commit positions, strings for versions.
    pub fn from_json(value: &serde_json::Value, kind: RevisionKind) -> Result<Self> {
        match (kind, value) {
            (RevisionKind::CommitPosition, serde_json::Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Revision::CommitPosition)
                .ok_or_else(|| BisectError::InvalidRevision(n.to_string())),
            (_, serde_json::Value::String(s)) => Revision::parse(s, kind),
            (_, other) => Err(BisectError::InvalidRevision(other.to_string())),
        }
    }
}

// Revisions of different kinds never share a list; the kind tag only makes
// the order total so lists can be sorted.
impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Revision::CommitPosition(a), Revision::CommitPosition(b)) => a.cmp(b),
            (Revision::Version(a), Revision::Version(b)) => a.cmp(b),
            (Revision::CommitPosition(_), Revision::Version(_)) => Ordering::Less,
            (Revision::Version(_), Revision::CommitPosition(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::CommitPosition(pos) => write!(f, "{}", pos),
            Revision::Version(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for Revision {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Revision::CommitPosition(pos) => serializer.serialize_u32(*pos),
            Revision::Version(v) => serializer.collect_str(v),
        }
    }
}

impl From<u32> for Revision {
    fn from(pos: u32) -> Self {
        Revision::CommitPosition(pos)
    }
}

impl From<Version> for Revision {
    fn from(v: Version) -> Self {
        Revision::Version(v)
    }
}

/// Changelog link for the span between two revisions, in either order.
pub fn changelog_url(a: &Revision, b: &Revision) -> String {
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    match min.kind() {
        RevisionKind::CommitPosition => {
            constants::short_changelog_url(&min.to_string(), &max.to_string())
        }
        RevisionKind::Version => {
            constants::release_changelog_url(&min.to_string(), &max.to_string())
        }
    }
}

/// Strictly increasing, duplicate-free sequence of revisions of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionList {
    kind: RevisionKind,
    revisions: Vec<Revision>,
}

impl RevisionList {
    pub fn new(kind: RevisionKind) -> Self {
        Self {
            kind,
            revisions: Vec::new(),
        }
    }

    /// Sorts and deduplicates; fails if any revision is of another kind.
    pub fn from_unsorted<I>(kind: RevisionKind, revisions: I) -> Result<Self>
    where
        I: IntoIterator<Item = Revision>,
    {
        let mut revisions: Vec<Revision> = revisions.into_iter().collect();
        if let Some(bad) = revisions.iter().find(|r| r.kind() != kind) {
            return Err(BisectError::InternalInvariantViolation(format!(
                "{} {} in a {} list",
                bad.kind(),
                bad,
                kind
            )));
        }
        revisions.sort();
        revisions.dedup();
        Ok(Self { kind, revisions })
    }

    pub fn kind(&self) -> RevisionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn first(&self) -> Option<&Revision> {
        self.revisions.first()
    }

    pub fn last(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Revision> {
        self.revisions.iter()
    }

    pub fn as_slice(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn contains(&self, rev: &Revision) -> bool {
        self.revisions.binary_search(rev).is_ok()
    }

    /// Set-union with `other`; the result stays sorted and deduplicated.
    pub fn merge(&mut self, other: &RevisionList) -> Result<()> {
        if other.kind != self.kind && !other.is_empty() {
            return Err(BisectError::InternalInvariantViolation(format!(
                "cannot merge a {} list into a {} list",
                other.kind, self.kind
            )));
        }
        self.revisions.extend(other.revisions.iter().cloned());
        self.revisions.sort();
        self.revisions.dedup();
        Ok(())
    }

    /// Revisions within the inclusive bounds; `None` leaves a side open.
    pub fn range(&self, lo: Option<&Revision>, hi: Option<&Revision>) -> RevisionList {
        let revisions = self
            .revisions
            .iter()
            .filter(|r| lo.is_none_or(|lo| *r >= lo) && hi.is_none_or(|hi| *r <= hi))
            .cloned()
            .collect();
        RevisionList {
            kind: self.kind,
            revisions,
        }
    }

    pub fn into_vec(self) -> Vec<Revision> {
        self.revisions
    }
}

impl<'a> IntoIterator for &'a RevisionList {
    type Item = &'a Revision;
    type IntoIter = std::slice::Iter<'a, Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.iter()
    }
}
