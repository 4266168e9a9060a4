//! Object storage seam.
//!
//! The pipeline only needs four things from durable storage: a readable byte
//! stream for a key, a writable stream that records a content type, metadata
//! lookup, and time-limited signed URLs for direct client transfers.
//! [`ObjectStore`] captures exactly that, synchronously, so implementations
//! for real providers can wrap an async SDK internally.
//!
//! Two implementations ship with the crate:
//! - [`MemoryObjectStore`] keeps everything in memory and can be told to fail
//!   uploads, which makes it the store of choice for tests;
//! - [`LocalObjectStore`] maps keys onto files under a root directory.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, create_dir_all, metadata, rename};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Category of a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    NotFound,
    InvalidInput,
    Io,
    Unavailable,
    Other,
}

/// Error returned by [`ObjectStore`] operations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn io(context: &str, e: &std::io::Error) -> Self {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            StorageErrorKind::NotFound
        } else {
            StorageErrorKind::Io
        };
        Self::new(kind, format!("{context}: {e}"))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    /// Unix timestamp in seconds.
    pub last_modified: i64,
}

/// Transfer direction a signed URL grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMethod {
    Get,
    Put,
}

impl fmt::Display for SignedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        })
    }
}

/// Durable object storage used by ingestion jobs.
pub trait ObjectStore: Send + Sync {
    /// Open a readable stream over an object.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` error if the key does not exist.
    fn open_read(&self, key: &str) -> StorageResult<Box<dyn Read + Send>>;

    /// Stream `body` into an object, replacing any previous content.
    /// Returns the number of bytes stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read or the object cannot be written.
    fn put_stream(&self, key: &str, content_type: &str, body: &mut dyn Read) -> StorageResult<u64>;

    /// Metadata for a key, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails.
    fn head(&self, key: &str) -> StorageResult<Option<ObjectMetadata>>;

    /// All objects whose key starts with `prefix`, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectMetadata>>;

    /// A URL that grants `method` on `key` until `expires_in` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot sign URLs for this key.
    fn signed_url(&self, key: &str, method: SignedMethod, expires_in: Duration)
    -> StorageResult<String>;

    /// Upload an in-memory payload.
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::put_stream`].
    fn put_bytes(&self, key: &str, content_type: &str, data: &[u8]) -> StorageResult<()> {
        self.put_stream(key, content_type, &mut Cursor::new(data))
            .map(|_| ())
    }

    /// Read a whole object into memory.
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::open_read`].
    fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        self.open_read(key)?
            .read_to_end(&mut out)
            .map_err(|e| StorageError::io(key, &e))?;
        Ok(out)
    }

    /// Whether `key` exists.
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::head`].
    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.head(key)?.is_some())
    }
}

/// Build a keyed signature for a signed URL.
fn sign(secret: &str, method: SignedMethod, key: &str, expires_at: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(method.to_string().as_bytes());
    hasher.update(key.as_bytes());
    hasher.update(expires_at.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

fn expiry(expires_in: Duration) -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(expires_in)
        .as_secs()
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Check a URL produced by one of this module's stores.
///
/// Returns `true` when the signature matches and the expiry has not passed.
#[must_use]
pub fn verify_signed_url(secret: &str, url: &str) -> bool {
    let Some((base, query)) = url.split_once('?') else {
        return false;
    };
    let mut method = None;
    let mut expires = None;
    let mut signature = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("method", "GET")) => method = Some(SignedMethod::Get),
            Some(("method", "PUT")) => method = Some(SignedMethod::Put),
            Some(("expires", v)) => expires = v.parse::<u64>().ok(),
            Some(("signature", v)) => signature = Some(v),
            _ => {}
        }
    }
    let (Some(method), Some(expires), Some(signature)) = (method, expires, signature) else {
        return false;
    };
    let Some((_, key)) = base
        .split_once("://")
        .and_then(|(_, rest)| rest.split_once('/'))
    else {
        return false;
    };
    let now = u64::try_from(now_secs()).unwrap_or(0);
    expires >= now && sign(secret, method, key, expires) == signature
}

fn render_signed_url(
    scheme: &str,
    authority: &str,
    secret: &str,
    key: &str,
    method: SignedMethod,
    expires_in: Duration,
) -> String {
    let expires = expiry(expires_in);
    let signature = sign(secret, method, key, expires);
    format!("{scheme}://{authority}/{key}?method={method}&expires={expires}&signature={signature}")
}

// ============================================================================
// MemoryObjectStore
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    content_type: String,
    last_modified: i64,
}

/// In-memory [`ObjectStore`].
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    failing_prefixes: Arc<Mutex<Vec<String>>>,
    secret: String,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_secret("memory-store")
    }

    /// A store that signs URLs with `secret`.
    #[must_use]
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Self::default()
        }
    }

    /// Make every upload whose key starts with `prefix` fail with `Unavailable`.
    pub fn fail_uploads_under(&self, prefix: impl Into<String>) {
        self.failing_prefixes
            .lock()
            .expect("failure list mutex poisoned")
            .push(prefix.into());
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().expect("storage mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn open_read(&self, key: &str) -> StorageResult<Box<dyn Read + Send>> {
        let objects = self.objects.lock().expect("storage mutex poisoned");
        let object = objects.get(key).ok_or_else(|| {
            StorageError::new(StorageErrorKind::NotFound, format!("object {key} not found"))
        })?;
        Ok(Box::new(Cursor::new(ArcBytes(Arc::clone(&object.data)))))
    }

    fn put_stream(&self, key: &str, content_type: &str, body: &mut dyn Read) -> StorageResult<u64> {
        let failing = self
            .failing_prefixes
            .lock()
            .expect("failure list mutex poisoned")
            .iter()
            .any(|p| key.starts_with(p.as_str()));
        if failing {
            return Err(StorageError::new(
                StorageErrorKind::Unavailable,
                format!("upload to {key} rejected"),
            ));
        }
        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .map_err(|e| StorageError::io(key, &e))?;
        let size = data.len() as u64;
        self.objects.lock().expect("storage mutex poisoned").insert(
            key.to_string(),
            StoredObject {
                data: Arc::new(data),
                content_type: content_type.to_string(),
                last_modified: now_secs(),
            },
        );
        Ok(size)
    }

    fn head(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        let objects = self.objects.lock().expect("storage mutex poisoned");
        Ok(objects.get(key).map(|o| ObjectMetadata {
            key: key.to_string(),
            size: o.data.len() as u64,
            content_type: Some(o.content_type.clone()),
            last_modified: o.last_modified,
        }))
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectMetadata>> {
        let objects = self.objects.lock().expect("storage mutex poisoned");
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectMetadata {
                key: k.clone(),
                size: o.data.len() as u64,
                content_type: Some(o.content_type.clone()),
                last_modified: o.last_modified,
            })
            .collect())
    }

    fn signed_url(
        &self,
        key: &str,
        method: SignedMethod,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(render_signed_url(
            "memory",
            "store",
            &self.secret,
            key,
            method,
            expires_in,
        ))
    }
}

/// Shared byte buffer readable through a `Cursor` without copying.
struct ArcBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

// ============================================================================
// LocalObjectStore
// ============================================================================

/// [`ObjectStore`] backed by a directory on the local file system.
///
/// Keys map to relative paths under the root. Uploads are written to a
/// temporary sibling and renamed into place, so readers never observe a
/// partially written object.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    secret: String,
}

impl LocalObjectStore {
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<String>) -> StorageResult<Self> {
        let root = root.into();
        create_dir_all(&root).map_err(|e| StorageError::io(&root.display().to_string(), &e))?;
        Ok(Self {
            root,
            secret: secret.into(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(StorageError::new(
                StorageErrorKind::InvalidInput,
                format!("invalid object key {key:?}"),
            ));
        }
        Ok(self.root.join(key))
    }

    fn metadata_of(&self, key: &str, path: &Path) -> StorageResult<ObjectMetadata> {
        let meta = metadata(path).map_err(|e| StorageError::io(key, &e))?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        Ok(ObjectMetadata {
            key: key.to_string(),
            size: meta.len(),
            content_type: None,
            last_modified,
        })
    }
}

impl ObjectStore for LocalObjectStore {
    fn open_read(&self, key: &str) -> StorageResult<Box<dyn Read + Send>> {
        let path = self.path_of(key)?;
        let file = File::open(&path).map_err(|e| StorageError::io(key, &e))?;
        Ok(Box::new(file))
    }

    fn put_stream(&self, key: &str, _content_type: &str, body: &mut dyn Read) -> StorageResult<u64> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            create_dir_all(parent).map_err(|e| StorageError::io(key, &e))?;
        }
        let tmp = PathBuf::from(format!("{}.partial", path.display()));
        let mut file = File::create(&tmp).map_err(|e| StorageError::io(key, &e))?;
        let size = std::io::copy(body, &mut file).map_err(|e| StorageError::io(key, &e))?;
        file.flush().map_err(|e| StorageError::io(key, &e))?;
        rename(&tmp, &path).map_err(|e| StorageError::io(key, &e))?;
        Ok(size)
    }

    fn head(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        let path = self.path_of(key)?;
        if !path.is_file() {
            return Ok(None);
        }
        self.metadata_of(key, &path).map(Some)
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectMetadata>> {
        let files = crate::io::listing::list_files(&self.root)
            .map_err(|e| StorageError::new(StorageErrorKind::Io, e.to_string()))?;
        let mut out = Vec::new();
        for path in files {
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) && !key.ends_with(".partial") {
                out.push(self.metadata_of(&key, &path)?);
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn signed_url(
        &self,
        key: &str,
        method: SignedMethod,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.path_of(key)?;
        Ok(render_signed_url(
            "file",
            &self.root.display().to_string().trim_start_matches('/').replace('/', "%2F"),
            &self.secret,
            key,
            method,
            expires_in,
        ))
    }
}
