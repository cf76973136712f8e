// Shared utility functions for CLI commands

use anyhow::{Context, Result};
use bisect_builds::cache::RevListCache;
use std::path::PathBuf;

/// Format number with thousand separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Revision cache for the run: disabled, at `path`, or at the default location
pub fn open_cache(enabled: bool, path: Option<PathBuf>) -> RevListCache {
    match (enabled, path) {
        (false, _) => RevListCache::disabled(),
        (true, Some(path)) => RevListCache::open(path),
        (true, None) => RevListCache::at_default_location(),
    }
}

/// Shell-quoted command line for printing
pub fn join_command(argv: &[String]) -> Result<String> {
    shlex::try_join(argv.iter().map(String::as_str)).context("Command line cannot be quoted for the shell")
}
