// Persistent revision list cache keyed by backend
//
// The file is a JSON object mapping a backend key to an ascending array of
// revisions (numbers for commit positions, strings for versions). Saving
// merges into the existing entry and rewrites the file atomically; keys
// this process never touched are written back unchanged.

use crate::constants;
use crate::error::Result;
use crate::revision::{Revision, RevisionKind, RevisionList};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Storage {
    Disabled,
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RevListCache {
    storage: Storage,
    /// Loaded lazily on first access
    entries: Option<Map<String, Value>>,
}

impl RevListCache {
    /// Every operation is a no-op; `get` is always empty.
    pub fn disabled() -> Self {
        Self {
            storage: Storage::Disabled,
            entries: None,
        }
    }

    /// Process-local cache that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            storage: Storage::Memory,
            entries: Some(Map::new()),
        }
    }

    /// Cache backed by the JSON file at `path` (created on first save).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: Storage::File(path.into()),
            entries: None,
        }
    }

    /// Cache at the per-user location, or disabled when none can be resolved.
    pub fn at_default_location() -> Self {
        match constants::default_cache_path() {
            Some(path) => Self::open(path),
            None => {
                log::warn!("No cache directory available; revision list cache disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.storage, Storage::Disabled)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::File(path) => Some(path),
            _ => None,
        }
    }

    /// Reads the cache file. Missing or malformed files load as empty.
    pub fn load(&mut self) -> &Map<String, Value> {
        if self.entries.is_none() {
            let loaded = match &self.storage {
                Storage::File(path) => read_entries(path),
                Storage::Memory | Storage::Disabled => Map::new(),
            };
            self.entries = Some(loaded);
        }
        self.entries.get_or_insert_with(Map::new)
    }

    /// Cached revisions under `key`, empty if absent. Entries that do not
    /// parse as `kind` are skipped.
    pub fn get(&mut self, key: &str, kind: RevisionKind) -> RevisionList {
        if !self.is_enabled() {
            return RevisionList::new(kind);
        }
        let Some(Value::Array(values)) = self.load().get(key) else {
            return RevisionList::new(kind);
        };
        let mut revisions = Vec::with_capacity(values.len());
        for value in values {
            match Revision::from_json(value, kind) {
                Ok(rev) => revisions.push(rev),
                Err(e) => log::warn!("Skipping cached revision under {}: {}", key, e),
            }
        }
        RevisionList::from_unsorted(kind, revisions).unwrap_or_else(|_| RevisionList::new(kind))
    }

    /// Merges `list` into the entry under `key` and rewrites the cache.
    /// Returns the merged list.
    pub fn save(&mut self, key: &str, list: &RevisionList) -> Result<RevisionList> {
        if !self.is_enabled() {
            return Ok(list.clone());
        }
        let mut merged = self.get(key, list.kind());
        merged.merge(list)?;
        if merged.is_empty() {
            return Ok(merged);
        }

        let value = serde_json::to_value(merged.as_slice())?;
        self.load();
        if let Some(entries) = self.entries.as_mut() {
            entries.insert(key.to_string(), value);
        }

        if let Storage::File(path) = &self.storage
            && let Some(entries) = &self.entries
        {
            write_entries(path, entries)?;
            log::info!(
                "Saved revisions {}-{} to {}",
                merged.first().map(ToString::to_string).unwrap_or_default(),
                merged.last().map(ToString::to_string).unwrap_or_default(),
                path.display()
            );
        }
        Ok(merged)
    }
}

fn read_entries(path: &Path) -> Map<String, Value> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            log::warn!("Load revisions cache error ({}): {}", path.display(), e);
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&data) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            log::warn!("Ignoring revisions cache {}: not a JSON object", path.display());
            Map::new()
        }
        Err(e) => {
            log::warn!("Load revisions cache error ({}): {}", path.display(), e);
            Map::new()
        }
    }
}

fn write_entries(path: &Path, entries: &Map<String, Value>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    serde_json::to_writer(&mut tmp, entries)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
