//! Storage composition root.

use tracing::info;

use crate::{
    backend::BackendDescriptor,
    migration::{DEFAULT_MIGRATION_CONCURRENCY, Migration, MigrationError, MigrationOutcome},
    repository::{
        DeploymentRepository, EventSubscribersRepository, FrameworkIdRepository,
        GroupRepository, ReadOnlyAppRepository, RepositoryFactory, RepositorySet,
        TaskFailureRepository, TaskRepository,
    },
    store::{StoreError, StoreId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    /// Upper bound on entity workers running at once inside one migration step.
    pub migration_concurrency: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            migration_concurrency: DEFAULT_MIGRATION_CONCURRENCY,
        }
    }
}

pub struct StorageModule {
    descriptor: BackendDescriptor,
    repositories: RepositorySet,
    app_repository: ReadOnlyAppRepository,
    migration: Migration,
}

impl StorageModule {
    /// Open the current store, the optional migration source, and wire the migration engine.
    ///
    /// The migration source is always read through the legacy layout, whatever its own
    /// descriptor says.
    pub async fn build(
        current: BackendDescriptor,
        legacy: Option<BackendDescriptor>,
        options: StorageOptions,
    ) -> Result<Self, StoreError> {
        let factory = RepositoryFactory::open(&current).await?;
        let repositories = factory.build();

        let legacy_repositories = match &legacy {
            Some(descriptor) => Some(RepositoryFactory::open_legacy(descriptor).await?.build()),
            None => None,
        };

        let store = (!current.is_in_memory()).then(|| factory.store_handle());
        info!(
            backend = current.kind_name(),
            store = %repositories.apps.store_id(),
            legacy_source = legacy.as_ref().map(|d| d.kind_name()),
            migrates = store.is_some(),
            "storage module ready"
        );

        let migration = Migration::new(
            repositories.clone(),
            legacy_repositories,
            legacy,
            store,
            options.migration_concurrency,
        );
        Ok(Self {
            descriptor: current,
            app_repository: ReadOnlyAppRepository::new(repositories.apps.clone()),
            repositories,
            migration,
        })
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn store_id(&self) -> &StoreId {
        self.repositories.apps.store_id()
    }

    /// Applications are read-only through the module.
    pub fn app_repository(&self) -> &ReadOnlyAppRepository {
        &self.app_repository
    }

    pub fn task_repository(&self) -> &TaskRepository {
        &self.repositories.tasks
    }

    pub fn deployment_repository(&self) -> &DeploymentRepository {
        &self.repositories.deployments
    }

    pub fn task_failure_repository(&self) -> &TaskFailureRepository {
        &self.repositories.task_failures
    }

    pub fn group_repository(&self) -> &GroupRepository {
        &self.repositories.groups
    }

    pub fn framework_id_repository(&self) -> &FrameworkIdRepository {
        &self.repositories.framework_id
    }

    pub fn event_subscribers_repository(&self) -> &EventSubscribersRepository {
        &self.repositories.event_subscribers
    }

    pub fn migration(&self) -> &Migration {
        &self.migration
    }

    /// Run the migration; callers must not serve requests until this returns `Ok`.
    pub async fn migrate(&self) -> Result<MigrationOutcome, MigrationError> {
        self.migration.migrate().await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        backend::{StorageSettings, resolve},
        domain::{App, Group},
        migration::{LATEST_STORAGE_VERSION, MigrationState},
        repository::Repository,
    };

    async fn module(backend: &str, root: &std::path::Path) -> StorageModule {
        let (current, legacy) = resolve(&StorageSettings::new(backend, root)).unwrap();
        StorageModule::build(current, legacy, StorageOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn accessors_share_one_store() {
        let tmp = tempfile::tempdir().unwrap();
        for backend in ["mem", "zk", "legacy_zk", "legacy_zk_mesos", "legacy_mem"] {
            let module = module(backend, tmp.path()).await;
            let id = module.store_id().clone();
            assert_eq!(module.app_repository().store_id(), &id, "{backend}");
            assert_eq!(module.task_repository().store_id(), &id);
            assert_eq!(module.deployment_repository().store_id(), &id);
            assert_eq!(module.task_failure_repository().store_id(), &id);
            assert_eq!(module.group_repository().store_id(), &id);
            assert_eq!(module.framework_id_repository().store_id(), &id);
            assert_eq!(module.event_subscribers_repository().store_id(), &id);
        }
    }

    #[tokio::test]
    async fn in_memory_backends_complete_without_a_marker() {
        let tmp = tempfile::tempdir().unwrap();
        for backend in ["mem", "legacy_mem"] {
            let module = module(backend, tmp.path()).await;
            let outcome = module.migrate().await.unwrap();
            assert!(outcome.applied.is_empty());
            assert_eq!(module.migration().state(), MigrationState::Completed);
            assert_eq!(module.migration().storage_version().await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn current_store_imports_legacy_data_written_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, legacy) = resolve(&StorageSettings::new("zk", tmp.path())).unwrap();
        let old = RepositoryFactory::open(&legacy.unwrap()).await.unwrap().build();
        let web = App::new("/prod/web", 1);
        old.apps.store(web.clone()).await.unwrap();
        old.groups
            .store(Group::new("/prod", 1).with_app(&web))
            .await
            .unwrap();

        let module = module("zk", tmp.path()).await;
        assert_eq!(module.migration().legacy_source().map(|d| d.kind_name()), Some("legacy_zk"));
        let outcome = module.migrate().await.unwrap();
        assert_eq!(outcome.to, LATEST_STORAGE_VERSION);
        assert_eq!(module.app_repository().get("/prod/web").await.unwrap(), Some(web));

        let group = module.group_repository().get("/prod").await.unwrap().unwrap();
        assert!(module.group_repository().resolve(&group).await.is_ok());
        assert_eq!(
            module.migration().storage_version().await.unwrap(),
            Some(LATEST_STORAGE_VERSION)
        );
    }
}
