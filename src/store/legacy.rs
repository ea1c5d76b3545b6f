use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::RwLock;
use tracing::debug;

use super::{BoxFuture, EntityStore, StoreError, StoreId, run_blocking, write_atomic};
use crate::backend::ConnectionParams;

const ENTITY_FILE_SUFFIX: &str = ".entity";

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Legacy entity store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    id: StoreId,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryEntityStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn store<'a>(&'a self, key: &'a str, data: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            validate_key(key)?;
            self.entries.write().await.insert(key.to_string(), data);
            Ok(())
        })
    }

    fn expunge<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.entries.write().await.remove(key).is_some()) })
    }

    fn names(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move { Ok(self.entries.read().await.keys().cloned().collect()) })
    }
}

/// Legacy entity store persisted as one `<key>.entity` file per entry in the store
/// directory. Every operation is bounded by the connection timeout.
#[derive(Debug)]
pub struct FileEntityStore {
    id: StoreId,
    dir: PathBuf,
    timeout: Duration,
}

impl FileEntityStore {
    pub async fn open(params: &ConnectionParams) -> Result<Self, StoreError> {
        let dir = params.store_dir();
        let create = dir.clone();
        run_blocking(params.timeout, "open", move || std::fs::create_dir_all(&create)).await?;
        debug!(dir = %dir.display(), "opened legacy entity store");
        Ok(Self {
            id: StoreId::new(),
            dir,
            timeout: params.timeout,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}{ENTITY_FILE_SUFFIX}")))
    }
}

impl EntityStore for FileEntityStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move {
            let path = self.entry_path(key)?;
            run_blocking(self.timeout, "fetch", move || match std::fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            })
            .await
        })
    }

    fn store<'a>(&'a self, key: &'a str, data: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let path = self.entry_path(key)?;
            run_blocking(self.timeout, "store", move || write_atomic(&path, &data)).await
        })
    }

    fn expunge<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let path = self.entry_path(key)?;
            run_blocking(self.timeout, "expunge", move || {
                match std::fs::remove_file(&path) {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await
        })
    }

    fn names(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        let dir = self.dir.clone();
        Box::pin(run_blocking(self.timeout, "names", move || {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().to_string();
                if let Some(key) = file_name.strip_suffix(ENTITY_FILE_SUFFIX) {
                    names.push(key.to_string());
                }
            }
            names.sort();
            Ok(names)
        }))
    }
}

/// Read-through cache in front of a legacy entity store.
///
/// The wrapped store must not be written by anyone else while the cache is in use. A miss
/// is filled while holding the cache lock, so a concurrent write through the cache is never
/// overwritten by the older value read on the miss.
pub struct CachingEntityStore {
    inner: Arc<dyn EntityStore>,
    entries: RwLock<HashMap<String, Option<Vec<u8>>>>,
    names: RwLock<Option<BTreeSet<String>>>,
}

impl CachingEntityStore {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
            names: RwLock::new(None),
        }
    }
}

impl EntityStore for CachingEntityStore {
    fn id(&self) -> &StoreId {
        self.inner.id()
    }

    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move {
            if let Some(cached) = self.entries.read().await.get(key) {
                return Ok(cached.clone());
            }
            let mut entries = self.entries.write().await;
            if let Some(cached) = entries.get(key) {
                return Ok(cached.clone());
            }
            let fetched = self.inner.fetch(key).await?;
            entries.insert(key.to_string(), fetched.clone());
            Ok(fetched)
        })
    }

    fn store<'a>(&'a self, key: &'a str, data: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            self.inner.store(key, data.clone()).await?;
            entries.insert(key.to_string(), Some(data));
            drop(entries);
            if let Some(names) = self.names.write().await.as_mut() {
                names.insert(key.to_string());
            }
            Ok(())
        })
    }

    fn expunge<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let removed = self.inner.expunge(key).await?;
            entries.insert(key.to_string(), None);
            drop(entries);
            if let Some(names) = self.names.write().await.as_mut() {
                names.remove(key);
            }
            Ok(removed)
        })
    }

    fn names(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            if let Some(names) = self.names.read().await.as_ref() {
                return Ok(names.iter().cloned().collect());
            }
            let mut names = self.names.write().await;
            if let Some(loaded) = names.as_ref() {
                return Ok(loaded.iter().cloned().collect());
            }
            let loaded: BTreeSet<String> = self.inner.names().await?.into_iter().collect();
            let out = loaded.iter().cloned().collect();
            *names = Some(loaded);
            Ok(out)
        })
    }
}
