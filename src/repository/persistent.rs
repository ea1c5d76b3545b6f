use std::{marker::PhantomData, sync::Arc};

use tracing::debug;

use super::{Repository, VersionedRepository};
use crate::{
    domain::{Entity, VersionId, Versioned},
    store::{
        BoxFuture, NodePath, PersistenceStore, StoreError, StoreId, decode_segment, encode_segment,
    },
};

const VERSIONS_NODE: &str = "versions";

/// Repository over the current node-tree layout.
///
/// ```text
/// <category>/<id>                      current record
/// <category>/<id>/versions/<version>   history
/// ```
pub struct PersistentRepository<T> {
    store: Arc<dyn PersistenceStore>,
    category: NodePath,
    max_versions: Option<usize>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> PersistentRepository<T> {
    pub fn new(store: Arc<dyn PersistenceStore>, max_versions: Option<usize>) -> Self {
        Self {
            store,
            category: category_path::<T>(),
            max_versions,
            _entity: PhantomData,
        }
    }

    fn entity_path(&self, id: &str) -> Result<NodePath, StoreError> {
        self.category.child(encode_segment(id))
    }

    fn versions_path(&self, id: &str) -> Result<NodePath, StoreError> {
        self.entity_path(id)?.child(VERSIONS_NODE)
    }

    async fn read_entity(&self, path: &NodePath) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.store.read(path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn list_versions(&self, id: &str) -> Result<Vec<VersionId>, StoreError> {
        let path = self.versions_path(id)?;
        let mut versions = Vec::new();
        for name in self.store.children(&path).await? {
            let version = VersionId::parse_key(&name).ok_or_else(|| StoreError::Corrupt {
                key: format!("{path}/{name}"),
                reason: "history entry is not a version".to_string(),
            })?;
            versions.push(version);
        }
        versions.sort();
        Ok(versions)
    }

    async fn write_version(&self, entity: &T, version: VersionId) -> Result<(), StoreError> {
        let id = entity.entity_id();
        let path = self.versions_path(&id)?.child(version.key())?;
        self.store.write(&path, serde_json::to_vec(entity)?).await
    }

    /// Drop the oldest history entries beyond the retention bound, never `keep`.
    async fn evict_history(&self, id: &str, keep: Option<VersionId>) -> Result<(), StoreError> {
        let Some(max_versions) = self.max_versions else {
            return Ok(());
        };
        let versions = self.list_versions(id).await?;
        if versions.len() <= max_versions {
            return Ok(());
        }
        let excess = versions.len() - max_versions;
        let evict: Vec<VersionId> = versions
            .into_iter()
            .filter(|v| Some(*v) != keep)
            .take(excess)
            .collect();
        let versions_path = self.versions_path(id)?;
        for version in evict {
            debug!(kind = %T::KIND, id, %version, "evicting history entry");
            self.store.delete(&versions_path.child(version.key())?).await?;
        }
        Ok(())
    }
}

fn category_path<T: Entity>() -> NodePath {
    // Categories are fixed, non-empty, slash-free names.
    NodePath::new([T::KIND.category()]).unwrap_or_else(|_| NodePath::root())
}

impl<T: Entity> Repository<T> for PersistentRepository<T> {
    fn store_id(&self) -> &StoreId {
        self.store.id()
    }

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<T>, StoreError>> {
        Box::pin(async move {
            let path = self.entity_path(id)?;
            self.read_entity(&path).await
        })
    }

    fn ids(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            self.store
                .children(&self.category)
                .await?
                .iter()
                .map(|name| decode_segment(name))
                .collect()
        })
    }

    fn store(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let id = entity.entity_id();
            if let Some(version) = entity.entity_version() {
                self.write_version(&entity, version).await?;
            }
            let path = self.entity_path(&id)?;
            self.store.write(&path, serde_json::to_vec(&entity)?).await?;
            if entity.entity_version().is_some() {
                self.evict_history(&id, entity.entity_version()).await?;
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let path = self.entity_path(id)?;
            self.store.delete(&path).await
        })
    }
}

impl<T: Versioned> VersionedRepository<T> for PersistentRepository<T> {
    fn versions<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<VersionId>, StoreError>> {
        Box::pin(self.list_versions(id))
    }

    fn get_version<'a>(
        &'a self,
        id: &'a str,
        version: VersionId,
    ) -> BoxFuture<'a, Result<Option<T>, StoreError>> {
        Box::pin(async move {
            let path = self.versions_path(id)?.child(version.key())?;
            self.read_entity(&path).await
        })
    }

    fn store_version(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let id = entity.entity_id();
            self.write_version(&entity, entity.version()).await?;
            let current = self.get(&id).await?.map(|c| c.version());
            self.evict_history(&id, current).await
        })
    }

    fn store_referenced_version(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { self.write_version(&entity, entity.version()).await })
    }
}
