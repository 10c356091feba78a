use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use liftcmp::{load_table, Table};
use tracing::{debug, warn};

pub const DEFAULT_CACHE_DIR: &str = ".cache/parsed_tables";

/// Parsed tables stored as JSON, one entry per source file version.
///
/// An entry is named after a fingerprint of the source path, size and
/// modification time, so editing a source file orphans its old entry.
#[derive(Clone, Debug)]
pub struct ParseCache {
    dir: PathBuf,
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }
}

impl ParseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_for(&self, source: &Path) -> Option<PathBuf> {
        let meta = fs::metadata(source).ok()?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();

        let mut hasher = DefaultHasher::new();
        source.to_string_lossy().hash(&mut hasher);
        meta.len().hash(&mut hasher);
        modified.as_nanos().hash(&mut hasher);
        Some(self.dir.join(format!("{:016x}.json", hasher.finish())))
    }

    pub fn get(&self, source: &Path) -> Option<Table> {
        let entry = self.entry_for(source)?;
        let text = fs::read_to_string(entry).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn put(&self, source: &Path, table: &Table) -> Result<()> {
        let entry = self
            .entry_for(source)
            .with_context(|| format!("failed to stat {}", source.display()))?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let text = serde_json::to_string(table)?;
        fs::write(&entry, text).with_context(|| format!("failed to write {}", entry.display()))?;
        Ok(())
    }

    /// Cached table for `source`, parsing and storing it on a miss.
    pub fn load(&self, source: &Path) -> Result<Table> {
        if let Some(table) = self.get(source) {
            debug!("cache hit for {}", source.display());
            return Ok(table);
        }
        let table =
            load_table(source).with_context(|| format!("failed to read {}", source.display()))?;
        if let Err(err) = self.put(source, &table) {
            warn!("Failed to cache {}: {}", source.display(), err);
        }
        Ok(table)
    }
}
