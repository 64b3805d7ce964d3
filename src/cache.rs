//! Source → converted-output cache.
//!
//! Entries are written once per source and trusted only while the output
//! file still exists. A lookup that finds the file gone evicts the entry, so
//! the next request converts again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// In-memory cache keyed by normalised source path.
///
/// Not synchronised on its own; the worker pool keeps it behind the same
/// lock as its queue so that "check cache, then enqueue" is atomic.
#[derive(Debug, Default)]
pub struct ConversionCache {
    entries: HashMap<PathBuf, PathBuf>,
}

impl ConversionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached output for `source` if the file is still on disk.
    ///
    /// A stale entry is evicted as a side effect.
    pub fn lookup(&mut self, source: &Path) -> Option<PathBuf> {
        let output = self.entries.get(source)?;
        if output.is_file() {
            return Some(output.clone());
        }
        self.entries.remove(source);
        None
    }

    /// Record `output` for `source`.
    ///
    /// A live entry is never overwritten; returns `false` in that case.
    pub fn insert(&mut self, source: PathBuf, output: PathBuf) -> bool {
        if let Some(existing) = self.entries.get(&source) {
            if existing.is_file() {
                return false;
            }
        }
        self.entries.insert(source, output);
        true
    }

    /// Drop the entry for `source`, returning the forgotten output path.
    pub fn invalidate(&mut self, source: &Path) -> Option<PathBuf> {
        self.entries.remove(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether an output left behind by an earlier run can stand in for a fresh
/// conversion of `source`: it must be a non-empty file not older than the
/// source.
pub fn reusable_output(source: &Path, output: &Path) -> bool {
    let Ok(out_meta) = std::fs::metadata(output) else {
        return false;
    };
    if !out_meta.is_file() || out_meta.len() == 0 {
        return false;
    }
    let modified = |m: &std::fs::Metadata| m.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    match std::fs::metadata(source) {
        Ok(src_meta) => modified(&out_meta) >= modified(&src_meta),
        Err(_) => false,
    }
}
