//! Repository contract shared by every backend.
//!
//! Each entity kind is served through the same capability traits regardless of where it is
//! stored: [`PersistentRepository`] covers the node-tree stores (coordination store and
//! in-memory), [`LegacyRepository`] the flat legacy entity store. Which one backs a
//! [`RepositorySet`] is decided once, by [`RepositoryFactory`].

use std::sync::Arc;

use crate::{
    domain::{
        App, DeploymentPlan, Entity, EventSubscribers, FrameworkId, Group, Task, TaskFailure,
        VersionId, Versioned,
    },
    store::{BoxFuture, StoreError, StoreId},
};

pub mod factory;
pub mod legacy;
pub mod persistent;

pub use factory::{RepositoryFactory, in_mem_repository, legacy_repository, zk_repository};
pub use legacy::LegacyRepository;
pub use persistent::PersistentRepository;

pub trait Repository<T: Entity>: Send + Sync + 'static {
    /// Store handle this repository reads and writes through.
    fn store_id(&self) -> &StoreId;

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<T>, StoreError>>;

    fn ids(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;

    /// Create or overwrite. Versioned kinds also record the entity in their history.
    fn store(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Remove the entity, including its history.
    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;
}

pub trait VersionedRepository<T: Versioned>: Repository<T> {
    /// Stored history versions, oldest first.
    fn versions<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<VersionId>, StoreError>>;

    fn get_version<'a>(
        &'a self,
        id: &'a str,
        version: VersionId,
    ) -> BoxFuture<'a, Result<Option<T>, StoreError>>;

    /// Record a history entry without touching the current record.
    fn store_version(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Record a history entry that another record points at. The retention bound is not
    /// applied, so the entry survives even when it is older than the retained window.
    fn store_referenced_version(&self, entity: T) -> BoxFuture<'_, Result<(), StoreError>>;
}

pub type AppRepository = Arc<dyn VersionedRepository<App>>;
pub type TaskRepository = Arc<dyn Repository<Task>>;
pub type DeploymentRepository = Arc<dyn Repository<DeploymentPlan>>;
pub type TaskFailureRepository = Arc<dyn Repository<TaskFailure>>;
pub type FrameworkIdRepository = Arc<dyn Repository<FrameworkId>>;
pub type EventSubscribersRepository = Arc<dyn Repository<EventSubscribers>>;

/// Read-only view of the app repository handed out beyond the storage boundary.
#[derive(Clone)]
pub struct ReadOnlyAppRepository {
    inner: AppRepository,
}

impl ReadOnlyAppRepository {
    pub fn new(inner: AppRepository) -> Self {
        Self { inner }
    }

    pub fn store_id(&self) -> &StoreId {
        self.inner.store_id()
    }

    pub async fn get(&self, id: &str) -> Result<Option<App>, StoreError> {
        self.inner.get(id).await
    }

    pub async fn ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.ids().await
    }

    pub async fn versions(&self, id: &str) -> Result<Vec<VersionId>, StoreError> {
        self.inner.versions(id).await
    }

    pub async fn get_version(&self, id: &str, version: VersionId) -> Result<Option<App>, StoreError> {
        self.inner.get_version(id, version).await
    }
}

/// A group together with the app versions it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroup {
    pub group: Group,
    pub apps: Vec<App>,
}

/// Group repository bound to the app repository of the same store.
#[derive(Clone)]
pub struct GroupRepository {
    groups: Arc<dyn VersionedRepository<Group>>,
    apps: AppRepository,
}

impl GroupRepository {
    pub fn new(groups: Arc<dyn VersionedRepository<Group>>, apps: AppRepository) -> Self {
        debug_assert_eq!(
            groups.store_id(),
            apps.store_id(),
            "group and app repositories must share one store"
        );
        Self { groups, apps }
    }

    pub fn store_id(&self) -> &StoreId {
        self.groups.store_id()
    }

    /// The underlying versioned group repository.
    pub fn versioned(&self) -> &Arc<dyn VersionedRepository<Group>> {
        &self.groups
    }

    pub async fn get(&self, id: &str) -> Result<Option<Group>, StoreError> {
        self.groups.get(id).await
    }

    pub async fn ids(&self) -> Result<Vec<String>, StoreError> {
        self.groups.ids().await
    }

    pub async fn versions(&self, id: &str) -> Result<Vec<VersionId>, StoreError> {
        self.groups.versions(id).await
    }

    pub async fn get_version(
        &self,
        id: &str,
        version: VersionId,
    ) -> Result<Option<Group>, StoreError> {
        self.groups.get_version(id, version).await
    }

    pub async fn store(&self, group: Group) -> Result<(), StoreError> {
        self.groups.store(group).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.groups.delete(id).await
    }

    /// Load every app version `group` references.
    pub async fn resolve(&self, group: &Group) -> Result<ResolvedGroup, StoreError> {
        let mut apps = Vec::with_capacity(group.apps.len());
        for (app_id, version) in &group.apps {
            let app = self
                .apps
                .get_version(app_id, *version)
                .await?
                .ok_or_else(|| StoreError::MissingReference {
                    group_id: group.id.clone(),
                    app_id: app_id.clone(),
                    version: *version,
                })?;
            apps.push(app);
        }
        Ok(ResolvedGroup {
            group: group.clone(),
            apps,
        })
    }
}

/// One repository per entity kind, all bound to the same store handle.
#[derive(Clone)]
pub struct RepositorySet {
    pub apps: AppRepository,
    pub tasks: TaskRepository,
    pub deployments: DeploymentRepository,
    pub task_failures: TaskFailureRepository,
    pub groups: GroupRepository,
    pub framework_id: FrameworkIdRepository,
    pub event_subscribers: EventSubscribersRepository,
}

impl RepositorySet {
    pub fn store_ids(&self) -> [&StoreId; 7] {
        [
            self.apps.store_id(),
            self.tasks.store_id(),
            self.deployments.store_id(),
            self.task_failures.store_id(),
            self.groups.store_id(),
            self.framework_id.store_id(),
            self.event_subscribers.store_id(),
        ]
    }

    pub fn shares_single_store(&self) -> bool {
        let ids = self.store_ids();
        ids.iter().all(|id| *id == ids[0])
    }
}
