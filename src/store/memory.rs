use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::RwLock;

use super::{BoxFuture, NodePath, PersistenceStore, StoreError, StoreId};

/// Node-tree store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    id: StoreId,
    nodes: RwLock<BTreeMap<NodePath, Vec<u8>>>,
    mutations: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored node, keyed by its path.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.nodes
            .read()
            .await
            .iter()
            .map(|(path, data)| (path.to_string(), data.clone()))
            .collect()
    }

    /// Number of writes and deletes applied since creation.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }
}

fn is_descendant(candidate: &NodePath, ancestor: &NodePath) -> bool {
    candidate.segments().len() > ancestor.segments().len()
        && candidate.segments().starts_with(ancestor.segments())
}

impl PersistenceStore for InMemoryStore {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn read<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move { Ok(self.nodes.read().await.get(path).cloned()) })
    }

    fn write<'a>(
        &'a self,
        path: &'a NodePath,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if path.is_root() {
                return Err(StoreError::InvalidKey {
                    key: path.to_string(),
                });
            }
            self.nodes.write().await.insert(path.clone(), data);
            self.mutations.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn children<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let depth = path.segments().len();
            let nodes = self.nodes.read().await;
            let mut names: Vec<String> = nodes
                .range(path.clone()..)
                .take_while(|(candidate, _)| candidate.segments().starts_with(path.segments()))
                .filter(|(candidate, _)| is_descendant(candidate, path))
                .map(|(candidate, _)| candidate.segments()[depth].clone())
                .collect();
            names.dedup();
            Ok(names)
        })
    }

    fn delete<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut nodes = self.nodes.write().await;
            let before = nodes.len();
            nodes.retain(|candidate, _| candidate != path && !is_descendant(candidate, path));
            let deleted = nodes.len() != before;
            if deleted {
                self.mutations.fetch_add(1, Ordering::Relaxed);
            }
            Ok(deleted)
        })
    }
}
