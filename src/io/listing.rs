//! File listings that feed staleness checks.
//!
//! A listing is a flat set of [`FileEntry`] triples (path, size, modification
//! time). Listings can come from a local directory tree or from an object
//! store prefix; either way the paths are made relative to the listed root
//! so the same content hashes the same wherever it lives.

use crate::io::object_store::ObjectStore;
use crate::versioning::FileEntry;
use anyhow::{Context, Result};
use glob::{Pattern, glob};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Expand a glob pattern into a sorted list of matching files.
///
/// Directories are skipped. An empty match is not an error.
///
/// # Errors
///
/// Returns an error if the pattern is invalid or a matched entry cannot be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Every regular file below `root`, sorted.
///
/// # Errors
///
/// Returns an error if the directory tree cannot be walked.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let escaped = Pattern::escape(&root.to_string_lossy());
    expand_glob(&format!("{escaped}/**/*"))
}

/// Snapshot a local directory tree.
///
/// Paths are relative to `root` and use `/` separators. Modification times
/// are milliseconds since the Unix epoch.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or a file's metadata cannot be read.
pub fn snapshot_dir(root: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for path in list_files(root)? {
        let meta = path
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(FileEntry::new(rel, meta.len(), modified));
    }
    Ok(entries)
}

/// Snapshot every object under `prefix` in an object store.
///
/// Keys are reported relative to `prefix`; modification times are the
/// store's seconds scaled to milliseconds.
///
/// # Errors
///
/// Returns an error if the store listing fails.
pub fn snapshot_store(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<FileEntry>> {
    let objects = store
        .list(prefix)
        .with_context(|| format!("list objects under {prefix}"))?;
    Ok(objects
        .into_iter()
        .map(|o| {
            let rel = o.key.strip_prefix(prefix).unwrap_or(&o.key).to_string();
            FileEntry::new(rel, o.size, o.last_modified.saturating_mul(1000))
        })
        .collect())
}
