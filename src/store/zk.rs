use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::debug;

use super::{
    BoxFuture, NodePath, PersistenceStore, StoreError, StoreId, run_blocking, write_atomic,
};
use crate::backend::ConnectionParams;

/// Payload file inside a node directory. Segments never start with `.`, so it cannot clash
/// with a child node.
const NODE_DATA_FILE: &str = ".data";

/// Coordination-store node tree rooted at `<root>/<namespace>`.
///
/// Every node is a directory; its payload (if any) lives in a `.data` file next to the
/// child node directories. Each operation runs on the blocking pool and is bounded by the
/// connection timeout.
#[derive(Debug)]
pub struct ZkStore {
    id: StoreId,
    base: PathBuf,
    timeout: Duration,
}

impl ZkStore {
    pub async fn open(params: &ConnectionParams) -> Result<Self, StoreError> {
        let base = params.store_dir();
        let timeout = params.timeout;
        let dir = base.clone();
        run_blocking(timeout, "open", move || {
            std::fs::create_dir_all(&dir)?;
            if !dir.is_dir() {
                return Err(io::Error::other(format!(
                    "store root is not a directory: {}",
                    dir.display()
                )));
            }
            Ok(())
        })
        .await?;

        debug!(base = %base.display(), "opened zk node store");
        Ok(Self {
            id: StoreId::new(),
            base,
            timeout,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn node_dir(&self, path: &NodePath) -> PathBuf {
        let mut dir = self.base.clone();
        for segment in path.segments() {
            dir.push(segment);
        }
        dir
    }
}

fn not_found_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl ZkStore {
    fn op<'a, T, F>(&'a self, op: &'static str, f: F) -> impl Future<Output = Result<T, StoreError>> + Send + 'a
    where
        T: Send + 'static,
        F: FnOnce() -> io::Result<T> + Send + 'static,
    {
        run_blocking(self.timeout, op, f)
    }
}

impl PersistenceStore for ZkStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn read<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        let file = self.node_dir(path).join(NODE_DATA_FILE);
        Box::pin(self.op("read", move || not_found_as_none(std::fs::read(&file))))
    }

    fn write<'a>(
        &'a self,
        path: &'a NodePath,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let dir = self.node_dir(path);
        let is_root = path.is_root();
        Box::pin(async move {
            if is_root {
                return Err(StoreError::InvalidKey {
                    key: path.to_string(),
                });
            }
            self.op("write", move || {
                std::fs::create_dir_all(&dir)?;
                write_atomic(&dir.join(NODE_DATA_FILE), &data)
            })
            .await
        })
    }

    fn children<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        let dir = self.node_dir(path);
        Box::pin(self.op("children", move || {
            let Some(entries) = not_found_as_none(std::fs::read_dir(&dir))? else {
                return Ok(Vec::new());
            };
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                names.push(name);
            }
            names.sort();
            Ok(names)
        }))
    }

    fn delete<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<bool, StoreError>> {
        let dir = self.node_dir(path);
        let is_root = path.is_root();
        Box::pin(async move {
            if is_root {
                return Err(StoreError::InvalidKey {
                    key: path.to_string(),
                });
            }
            self.op("delete", move || {
                Ok(not_found_as_none(std::fs::remove_dir_all(&dir))?.is_some())
            })
            .await
        })
    }
}
