//! Store handles backing the repositories.
//!
//! Two storage shapes exist side by side:
//! - [`PersistenceStore`]: the current layout, a tree of nodes that each carry an optional
//!   payload (coordination-store style). Implemented by [`InMemoryStore`] and [`ZkStore`].
//! - [`EntityStore`]: the legacy layout, a flat namespace of named blobs. Implemented by
//!   [`MemoryEntityStore`], [`FileEntityStore`] and the [`CachingEntityStore`] wrapper.

use std::{
    fs,
    future::Future,
    io::{self, Write},
    path::Path,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

pub mod legacy;
pub mod memory;
pub mod zk;

pub use legacy::{CachingEntityStore, FileEntityStore, MemoryEntityStore};
pub use memory::InMemoryStore;
pub use zk::ZkStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
    /// The store could not be reached within its operation timeout.
    Unavailable { reason: String },
    InvalidKey { key: String },
    Corrupt { key: String, reason: String },
    /// A group references an app version that is not stored.
    MissingReference {
        group_id: String,
        app_id: String,
        version: crate::domain::VersionId,
    },
    /// A blocking or worker task died before reporting a result.
    Worker { reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::SerdeJson(e) => write!(f, "json error: {e}"),
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
            Self::InvalidKey { key } => write!(f, "invalid store key: {key:?}"),
            Self::Corrupt { key, reason } => write!(f, "corrupt record at {key}: {reason}"),
            Self::MissingReference {
                group_id,
                app_id,
                version,
            } => write!(
                f,
                "group {group_id} references missing app version: app_id={app_id} version={version}"
            ),
            Self::Worker { reason } => write!(f, "store worker failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
            Self::Unavailable { .. }
            | Self::InvalidKey { .. }
            | Self::Corrupt { .. }
            | Self::MissingReference { .. }
            | Self::Worker { .. } => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerdeJson(value)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Worker {
            reason: value.to_string(),
        }
    }
}

/// Identity of an opened store handle.
///
/// Repositories report the id of the handle they were built on, so callers can check that a
/// repository set shares one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(String);

impl StoreId {
    pub fn new() -> Self {
        Self(crate::id::new_ulid_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a node in a [`PersistenceStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self(segments))
    }

    pub fn child(&self, segment: impl Into<String>) -> Result<Self, StoreError> {
        let segment = segment.into();
        validate_segment(&segment)?;
        let mut segments = self.0.clone();
        segments.push(segment);
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

fn validate_segment(segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() || segment.contains('/') || segment.starts_with('.') {
        return Err(StoreError::InvalidKey {
            key: segment.to_string(),
        });
    }
    Ok(())
}

/// Current-layout store: a tree of nodes, each with an optional payload.
pub trait PersistenceStore: Send + Sync + 'static {
    fn id(&self) -> &StoreId;

    fn read<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>>;

    /// Create or overwrite the payload of `path`, creating missing parents.
    fn write<'a>(&'a self, path: &'a NodePath, data: Vec<u8>)
    -> BoxFuture<'a, Result<(), StoreError>>;

    /// Names of the direct children of `path`, sorted.
    fn children<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<Vec<String>, StoreError>>;

    /// Remove `path` and its whole subtree. Returns whether anything existed.
    fn delete<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<bool, StoreError>>;
}

/// Legacy-layout store: flat named blobs.
pub trait EntityStore: Send + Sync + 'static {
    fn id(&self) -> &StoreId;

    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>>;

    fn store<'a>(&'a self, key: &'a str, data: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>>;

    fn expunge<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// All stored keys, sorted.
    fn names(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;
}

/// The store a repository set writes through, as seen by the migration engine.
#[derive(Clone)]
pub enum StoreHandle {
    Persistent(Arc<dyn PersistenceStore>),
    Legacy(Arc<dyn EntityStore>),
}

impl StoreHandle {
    pub fn id(&self) -> StoreId {
        match self {
            Self::Persistent(store) => store.id().clone(),
            Self::Legacy(store) => store.id().clone(),
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistent(store) => write!(f, "StoreHandle::Persistent({})", store.id()),
            Self::Legacy(store) => write!(f, "StoreHandle::Legacy({})", store.id()),
        }
    }
}

/// Escape an entity id so it is usable as a single key segment.
pub fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (idx, ch) in raw.chars().enumerate() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ':' => out.push_str("%3A"),
            '.' if idx == 0 => out.push_str("%2E"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn decode_segment(encoded: &str) -> Result<String, StoreError> {
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3).ok_or_else(|| StoreError::InvalidKey {
            key: encoded.to_string(),
        })?;
        let ch = match escape {
            "%25" => '%',
            "%2F" => '/',
            "%3A" => ':',
            "%2E" => '.',
            _ => {
                return Err(StoreError::InvalidKey {
                    key: encoded.to_string(),
                });
            }
        };
        out.push(ch);
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Run blocking file IO on the blocking pool, bounded by `timeout`.
///
/// An expired timeout surfaces as [`StoreError::Unavailable`]; the blocking task itself is
/// left to finish on its own.
pub(crate) async fn run_blocking<T, F>(timeout: Duration, op: &str, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => Ok(joined??),
        Err(_elapsed) => Err(StoreError::Unavailable {
            reason: format!("{op} timed out after {}ms", timeout.as_millis()),
        }),
    }
}

/// Replace `path` with `bytes` through a uniquely named temp file in the same directory.
///
/// Concurrent writers of one path never share a temp file; the last rename wins. Both the
/// file and its directory are synced before returning.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp_path = dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        crate::id::new_ulid_string()
    ));

    let written = write_synced(&tmp_path, bytes).and_then(|()| {
        #[cfg(windows)]
        {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
        fs::rename(&tmp_path, path)
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    sync_dir(dir)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), io::Error> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), io::Error> {
    Ok(())
}
