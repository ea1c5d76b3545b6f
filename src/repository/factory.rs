use std::sync::Arc;

use tracing::info;

use super::{
    AppRepository, DeploymentRepository, EventSubscribersRepository, FrameworkIdRepository,
    GroupRepository, LegacyRepository, PersistentRepository, RepositorySet, TaskFailureRepository,
    TaskRepository, VersionedRepository,
};
use crate::{
    backend::{BackendDescriptor, LegacyVariant},
    domain::{Entity, Group, Versioned},
    store::{
        CachingEntityStore, EntityStore, FileEntityStore, InMemoryStore, MemoryEntityStore,
        PersistenceStore, StoreError, StoreHandle, ZkStore,
    },
};

#[derive(Clone)]
enum Strategy {
    Legacy(Arc<dyn EntityStore>),
    Zk(Arc<ZkStore>),
    InMem(Arc<InMemoryStore>),
}

/// Builds repositories for every entity kind over one opened store handle.
///
/// The handle is opened once per factory; every repository it builds shares that handle.
#[derive(Clone)]
pub struct RepositoryFactory {
    strategy: Strategy,
    max_versions: usize,
    durable: bool,
}

impl RepositoryFactory {
    /// Open the store for the active backend.
    pub async fn open(descriptor: &BackendDescriptor) -> Result<Self, StoreError> {
        let max_versions = descriptor.max_versions();
        let strategy = match descriptor {
            BackendDescriptor::InMemory { .. } => Strategy::InMem(Arc::new(InMemoryStore::new())),
            BackendDescriptor::CurrentStore { connection, .. } => {
                Strategy::Zk(Arc::new(ZkStore::open(connection).await?))
            }
            BackendDescriptor::LegacyStore {
                variant: LegacyVariant::InMemory,
                ..
            } => Strategy::Legacy(Arc::new(MemoryEntityStore::new())),
            BackendDescriptor::LegacyStore {
                variant: LegacyVariant::ZkCompat,
                connection,
                cache,
                ..
            } => {
                let store: Arc<dyn EntityStore> = Arc::new(FileEntityStore::open(connection).await?);
                if *cache {
                    Strategy::Legacy(Arc::new(CachingEntityStore::new(store)))
                } else {
                    Strategy::Legacy(store)
                }
            }
        };
        info!(
            backend = descriptor.kind_name(),
            max_versions, "opened repository store"
        );
        Ok(Self {
            strategy,
            max_versions,
            durable: !descriptor.is_in_memory(),
        })
    }

    /// Open a legacy-layout reader for a migration source.
    ///
    /// A current-store descriptor yields an uncached reader over the same directory, since
    /// legacy data may sit beside current nodes.
    pub async fn open_legacy(descriptor: &BackendDescriptor) -> Result<Self, StoreError> {
        let store: Arc<dyn EntityStore> = match descriptor {
            BackendDescriptor::InMemory { .. }
            | BackendDescriptor::LegacyStore {
                variant: LegacyVariant::InMemory,
                ..
            } => Arc::new(MemoryEntityStore::new()),
            BackendDescriptor::CurrentStore { connection, .. } => {
                Arc::new(FileEntityStore::open(connection).await?)
            }
            BackendDescriptor::LegacyStore {
                variant: LegacyVariant::ZkCompat,
                connection,
                cache,
                ..
            } => {
                let store: Arc<dyn EntityStore> = Arc::new(FileEntityStore::open(connection).await?);
                if *cache {
                    Arc::new(CachingEntityStore::new(store))
                } else {
                    store
                }
            }
        };
        Ok(Self {
            strategy: Strategy::Legacy(store),
            max_versions: descriptor.max_versions(),
            durable: descriptor.connection().is_some(),
        })
    }

    pub fn with_memory_store(store: Arc<InMemoryStore>, max_versions: usize) -> Self {
        Self {
            strategy: Strategy::InMem(store),
            max_versions,
            durable: false,
        }
    }

    /// Wrap an already opened legacy store. Treated as durable.
    pub fn with_entity_store(store: Arc<dyn EntityStore>, max_versions: usize) -> Self {
        Self {
            strategy: Strategy::Legacy(store),
            max_versions,
            durable: true,
        }
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// The single store handle shared by every repository this factory builds.
    pub fn store_handle(&self) -> StoreHandle {
        match &self.strategy {
            Strategy::Legacy(store) => StoreHandle::Legacy(store.clone()),
            Strategy::Zk(store) => StoreHandle::Persistent(store.clone()),
            Strategy::InMem(store) => StoreHandle::Persistent(store.clone()),
        }
    }

    /// Whether data written through this factory outlives the process.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    fn versioned<T: Versioned>(&self, bounded: bool) -> Arc<dyn VersionedRepository<T>> {
        let max_versions = bounded.then_some(self.max_versions);
        match &self.strategy {
            Strategy::Legacy(store) => legacy_repository(store.clone(), max_versions),
            Strategy::Zk(store) => zk_repository(store.clone(), max_versions),
            Strategy::InMem(store) => in_mem_repository(store.clone(), max_versions),
        }
    }

    fn unversioned<T: Entity>(&self) -> Arc<dyn super::Repository<T>> {
        match &self.strategy {
            Strategy::Legacy(store) => Arc::new(LegacyRepository::<T>::new(store.clone(), None)),
            Strategy::Zk(store) => Arc::new(PersistentRepository::<T>::new(store.clone(), None)),
            Strategy::InMem(store) => {
                Arc::new(PersistentRepository::<T>::new(store.clone(), None))
            }
        }
    }

    pub fn app_repository(&self) -> AppRepository {
        self.versioned(true)
    }

    /// Groups are bound to the app repository of the same store.
    pub fn group_repository(&self, apps: &AppRepository) -> GroupRepository {
        let groups: Arc<dyn VersionedRepository<Group>> = self.versioned(true);
        GroupRepository::new(groups, apps.clone())
    }

    pub fn task_repository(&self) -> TaskRepository {
        self.unversioned()
    }

    pub fn deployment_repository(&self) -> DeploymentRepository {
        self.unversioned()
    }

    pub fn task_failure_repository(&self) -> TaskFailureRepository {
        self.unversioned()
    }

    pub fn framework_id_repository(&self) -> FrameworkIdRepository {
        self.unversioned()
    }

    pub fn event_subscribers_repository(&self) -> EventSubscribersRepository {
        self.unversioned()
    }

    pub fn build(&self) -> RepositorySet {
        let apps = self.app_repository();
        let groups = self.group_repository(&apps);
        RepositorySet {
            tasks: self.task_repository(),
            deployments: self.deployment_repository(),
            task_failures: self.task_failure_repository(),
            framework_id: self.framework_id_repository(),
            event_subscribers: self.event_subscribers_repository(),
            groups,
            apps,
        }
    }
}

pub fn legacy_repository<T: Versioned>(
    store: Arc<dyn EntityStore>,
    max_versions: Option<usize>,
) -> Arc<dyn VersionedRepository<T>> {
    Arc::new(LegacyRepository::new(store, max_versions))
}

pub fn zk_repository<T: Versioned>(
    store: Arc<ZkStore>,
    max_versions: Option<usize>,
) -> Arc<dyn VersionedRepository<T>> {
    let store: Arc<dyn PersistenceStore> = store;
    Arc::new(PersistentRepository::new(store, max_versions))
}

pub fn in_mem_repository<T: Versioned>(
    store: Arc<InMemoryStore>,
    max_versions: Option<usize>,
) -> Arc<dyn VersionedRepository<T>> {
    let store: Arc<dyn PersistenceStore> = store;
    Arc::new(PersistentRepository::new(store, max_versions))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        backend::{StorageSettings, resolve},
        domain::{App, FrameworkId},
    };

    async fn factories(root: &std::path::Path) -> Vec<RepositoryFactory> {
        let mut out = Vec::new();
        for backend in ["mem", "zk", "legacy_zk", "legacy_zk_mesos", "legacy_mem"] {
            let (current, _) = resolve(&StorageSettings::new(backend, root)).unwrap();
            out.push(RepositoryFactory::open(&current).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn every_repository_shares_one_store_handle() {
        let tmp = tempfile::tempdir().unwrap();
        for factory in factories(tmp.path()).await {
            let repos = factory.build();
            assert!(repos.shares_single_store());
            assert_eq!(repos.apps.store_id(), &factory.store_handle().id());
        }
    }

    #[tokio::test]
    async fn durability_follows_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let durable: Vec<bool> = factories(tmp.path())
            .await
            .iter()
            .map(RepositoryFactory::is_durable)
            .collect();
        assert_eq!(durable, vec![false, true, true, true, false]);
    }

    #[tokio::test]
    async fn only_apps_and_groups_are_bounded() {
        let factory = RepositoryFactory::with_memory_store(Arc::new(InMemoryStore::new()), 2);
        let repos = factory.build();
        for v in 1..=3 {
            repos.apps.store(App::new("/web", v)).await.unwrap();
            repos.groups.store(Group::new("/", v)).await.unwrap();
        }
        assert_eq!(repos.apps.versions("/web").await.unwrap().len(), 2);
        assert_eq!(repos.groups.versions("/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn legacy_reader_sees_flat_entries_beside_current_nodes() {
        let tmp = tempfile::tempdir().unwrap();
        let (current, legacy) = resolve(&StorageSettings::new("zk", tmp.path())).unwrap();

        let old = RepositoryFactory::open(&legacy.clone().unwrap()).await.unwrap();
        old.framework_id_repository()
            .store(FrameworkId {
                id: "fw-1".to_string(),
            })
            .await
            .unwrap();

        let new = RepositoryFactory::open(&current).await.unwrap();
        assert_eq!(
            new.framework_id_repository().ids().await.unwrap(),
            Vec::<String>::new()
        );

        let reader = RepositoryFactory::open_legacy(&legacy.unwrap()).await.unwrap();
        assert!(matches!(reader.store_handle(), StoreHandle::Legacy(_)));
        assert_eq!(
            reader
                .framework_id_repository()
                .get(crate::domain::FRAMEWORK_ID_KEY)
                .await
                .unwrap()
                .map(|f| f.id),
            Some("fw-1".to_string())
        );
    }
}
