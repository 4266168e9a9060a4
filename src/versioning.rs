//! Staleness checks for derived artifacts.
//!
//! A derived artifact (columnar blocks, a materialized query result) is
//! current when the content hash of the inputs it was built from matches the
//! hash recorded when it was built. [`HashResolver`] answers that question
//! and nothing more: it never touches storage, and whether to rebuild or copy
//! forward is up to the caller.
//!
//! ```
//! use sluice::versioning::{FileEntry, HashResolver, MemoryHashStore};
//!
//! # fn main() -> sluice::Result<()> {
//! let store = MemoryHashStore::new();
//! let resolver = HashResolver::new(&store);
//! let listing = vec![FileEntry::new("orders/2024.csv", 1024, 1_700_000_000_000)];
//!
//! let first = resolver.resolve("orders", &listing)?;
//! assert!(!first.up_to_date);
//! resolver.record("orders", &first.current_hash)?;
//!
//! assert!(resolver.resolve("orders", &listing)?.up_to_date);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// One file of a listing snapshot.
///
/// Ordering is by path first, which is the canonical order for hashing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size: u64, last_modified: i64) -> Self {
        Self {
            path: path.into(),
            size,
            last_modified,
        }
    }
}

/// Hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical hash of a listing.
///
/// The listing is sorted first, so the order entries were collected in does
/// not matter.
#[must_use]
pub fn content_hash(entries: &[FileEntry]) -> ContentHash {
    let mut sorted: Vec<&FileEntry> = entries.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.path.as_bytes());
        hasher.update([0]);
        hasher.update(entry.size.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(entry.last_modified.to_string().as_bytes());
        hasher.update(b"\n");
    }
    ContentHash(format!("{:x}", hasher.finalize()))
}

/// Hash of an arbitrary payload, used to name derived artifacts.
#[must_use]
pub fn payload_hash(payload: &[u8]) -> ContentHash {
    ContentHash(format!("{:x}", Sha256::digest(payload)))
}

/// Persistence for recorded hashes, keyed by target.
pub trait HashStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, target: &str) -> Result<Option<ContentHash>>;

    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn put(&self, target: &str, hash: &ContentHash) -> Result<()>;
}

/// [`HashStore`] that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryHashStore {
    hashes: Mutex<BTreeMap<String, ContentHash>>,
}

impl MemoryHashStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashStore for MemoryHashStore {
    fn get(&self, target: &str) -> Result<Option<ContentHash>> {
        Ok(self
            .hashes
            .lock()
            .expect("hash store mutex poisoned")
            .get(target)
            .cloned())
    }

    fn put(&self, target: &str, hash: &ContentHash) -> Result<()> {
        self.hashes
            .lock()
            .expect("hash store mutex poisoned")
            .insert(target.to_string(), hash.clone());
        Ok(())
    }
}

/// [`HashStore`] persisted to a single postcard-encoded file.
///
/// The whole table is rewritten on every `put`.
#[derive(Debug)]
pub struct FileHashStore {
    path: PathBuf,
    hashes: Mutex<BTreeMap<String, ContentHash>>,
}

impl FileHashStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let hashes = match fs::read(&path) {
            Ok(bytes) => postcard::from_bytes(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            hashes: Mutex::new(hashes),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HashStore for FileHashStore {
    fn get(&self, target: &str) -> Result<Option<ContentHash>> {
        Ok(self
            .hashes
            .lock()
            .expect("hash store mutex poisoned")
            .get(target)
            .cloned())
    }

    fn put(&self, target: &str, hash: &ContentHash) -> Result<()> {
        let mut hashes = self.hashes.lock().expect("hash store mutex poisoned");
        hashes.insert(target.to_string(), hash.clone());
        let bytes = postcard::to_allocvec(&*hashes)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Outcome of one staleness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// `true` when the recorded hash equals the current one.
    pub up_to_date: bool,
    /// Hash recorded for the target, if any.
    pub prior_hash: Option<ContentHash>,
    /// Hash of the listing that was just checked. Record it after rebuilding.
    pub current_hash: ContentHash,
}

/// Compares listings against recorded hashes.
pub struct HashResolver<'a> {
    store: &'a dyn HashStore,
}

impl<'a> HashResolver<'a> {
    pub fn new(store: &'a dyn HashStore) -> Self {
        Self { store }
    }

    /// Decide whether the artifacts built for `target` are stale with
    /// respect to `listing`. The hash is recomputed on every call.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded hash cannot be read.
    pub fn resolve(&self, target: &str, listing: &[FileEntry]) -> Result<Resolution> {
        let current_hash = content_hash(listing);
        let prior_hash = self.store.get(target)?;
        let up_to_date = prior_hash.as_ref() == Some(&current_hash);
        debug!(
            target,
            files = listing.len(),
            current = %current_hash,
            up_to_date,
            "resolved content hash"
        );
        Ok(Resolution {
            up_to_date,
            prior_hash,
            current_hash,
        })
    }

    /// Record `hash` as the one `target`'s artifacts were built from.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn record(&self, target: &str, hash: &ContentHash) -> Result<()> {
        self.store.put(target, hash)
    }
}
