//! Built-in migration steps and the copy helpers they share.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use futures_util::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::{MigrationContext, MigrationStep, StorageVersion};
use crate::{
    domain::{Entity, FRAMEWORK_ID_KEY, FrameworkId, VersionId, Versioned},
    repository::{AppRepository, Repository, RepositorySet, VersionedRepository},
    store::{NodePath, StoreError, StoreHandle},
};

pub const LATEST_STORAGE_VERSION: StorageVersion = StorageVersion(4);

/// Root node that held the framework id as a plain string before it moved under
/// `/framework`.
pub const OLD_FRAMEWORK_ID_NODE: &str = "framework-id";

pub fn builtin_steps() -> Vec<MigrationStep> {
    vec![
        MigrationStep::new(
            StorageVersion(0),
            StorageVersion(1),
            "import-legacy-apps-and-groups",
            |ctx| Box::pin(import_apps_and_groups(ctx)),
        ),
        MigrationStep::new(
            StorageVersion(1),
            StorageVersion(2),
            "import-legacy-runtime-state",
            |ctx| Box::pin(import_runtime_state(ctx)),
        ),
        MigrationStep::new(
            StorageVersion(2),
            StorageVersion(3),
            "import-legacy-framework-metadata",
            |ctx| Box::pin(import_framework_metadata(ctx)),
        ),
        MigrationStep::new(
            StorageVersion(3),
            StorageVersion(4),
            "relocate-framework-id-node",
            |ctx| Box::pin(relocate_framework_id_node(ctx)),
        ),
    ]
}

async fn import_apps_and_groups(ctx: MigrationContext) -> Result<usize, StoreError> {
    let Some(legacy) = ctx.legacy.clone() else {
        return Ok(0);
    };
    // Apps go first so every imported group finds its references.
    let apps = copy_versioned(
        legacy.apps.clone(),
        ctx.current.apps.clone(),
        ctx.concurrency,
    )
    .await?;
    let groups = import_groups(&legacy, &ctx.current, ctx.concurrency).await?;
    Ok(apps + groups)
}

async fn import_runtime_state(ctx: MigrationContext) -> Result<usize, StoreError> {
    let Some(legacy) = ctx.legacy.clone() else {
        return Ok(0);
    };
    let tasks = copy_all(legacy.tasks, ctx.current.tasks.clone(), ctx.concurrency).await?;
    let failures = copy_all(
        legacy.task_failures,
        ctx.current.task_failures.clone(),
        ctx.concurrency,
    )
    .await?;
    let deployments = copy_all(
        legacy.deployments,
        ctx.current.deployments.clone(),
        ctx.concurrency,
    )
    .await?;
    Ok(tasks + failures + deployments)
}

async fn import_framework_metadata(ctx: MigrationContext) -> Result<usize, StoreError> {
    let Some(legacy) = ctx.legacy.clone() else {
        return Ok(0);
    };
    let framework_id = copy_all(
        legacy.framework_id,
        ctx.current.framework_id.clone(),
        ctx.concurrency,
    )
    .await?;
    let subscribers = copy_all(
        legacy.event_subscribers,
        ctx.current.event_subscribers.clone(),
        ctx.concurrency,
    )
    .await?;
    Ok(framework_id + subscribers)
}

async fn relocate_framework_id_node(ctx: MigrationContext) -> Result<usize, StoreError> {
    let StoreHandle::Persistent(store) = &ctx.store else {
        return Ok(0);
    };
    let old = NodePath::new([OLD_FRAMEWORK_ID_NODE])?;
    let Some(bytes) = store.read(&old).await? else {
        return Ok(0);
    };
    let id = String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StoreError::Corrupt {
            key: old.to_string(),
            reason: "framework id is not a non-empty UTF-8 string".to_string(),
        })?;

    let mut written = 0;
    match ctx.current.framework_id.get(FRAMEWORK_ID_KEY).await? {
        Some(existing) if existing.id != id => {
            warn!(
                old = %id,
                current = %existing.id,
                "framework id node is superseded by the stored framework id"
            );
        }
        Some(_) => {}
        None => {
            ctx.current.framework_id.store(FrameworkId { id }).await?;
            written = 1;
        }
    }
    store.delete(&old).await?;
    Ok(written)
}

/// Run `work` once per item on worker tasks, at most `concurrency` at a time.
///
/// Returns how many invocations reported a written entity. Every worker is awaited before
/// the first error is returned.
async fn for_each_item<I, F, Fut>(
    items: Vec<I>,
    concurrency: usize,
    work: F,
) -> Result<usize, StoreError>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<bool, StoreError>> + Send + 'static,
{
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(items.len());
    for item in items {
        let permit = sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| StoreError::Worker {
                reason: e.to_string(),
            })?;
        let fut = work(item);
        tasks.push(tokio::spawn(async move {
            let _permit = permit;
            fut.await
        }));
    }

    let mut copied = 0;
    let mut first_err = None;
    for joined in join_all(tasks).await {
        match joined.map_err(StoreError::from).and_then(|r| r) {
            Ok(true) => copied += 1,
            Ok(false) => {}
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(copied),
    }
}

/// Copy every entity of one kind, current records only.
async fn copy_all<T: Entity>(
    source: Arc<dyn Repository<T>>,
    target: Arc<dyn Repository<T>>,
    concurrency: usize,
) -> Result<usize, StoreError> {
    let ids = source.ids().await?;
    debug!(kind = %T::KIND, count = ids.len(), "copying entities");
    let copied = for_each_item(ids, concurrency, |id| {
        let source = source.clone();
        let target = target.clone();
        async move {
            let Some(entity) = source.get(&id).await? else {
                return Ok(false);
            };
            target.store(entity).await?;
            Ok::<_, StoreError>(true)
        }
    })
    .await?;
    info!(kind = %T::KIND, copied, "copied entities");
    Ok(copied)
}

/// Copy every entity of one versioned kind: history first, then the current record.
async fn copy_versioned<T: Versioned>(
    source: Arc<dyn VersionedRepository<T>>,
    target: Arc<dyn VersionedRepository<T>>,
    concurrency: usize,
) -> Result<usize, StoreError> {
    let ids = source.ids().await?;
    debug!(kind = %T::KIND, count = ids.len(), "copying versioned entities");
    let copied = for_each_item(ids, concurrency, |id| {
        let source = source.clone();
        let target = target.clone();
        async move { copy_one_versioned(source.as_ref(), target.as_ref(), &id).await }
    })
    .await?;
    info!(kind = %T::KIND, copied, "copied versioned entities");
    Ok(copied)
}

async fn copy_one_versioned<T: Versioned>(
    source: &dyn VersionedRepository<T>,
    target: &dyn VersionedRepository<T>,
    id: &str,
) -> Result<bool, StoreError> {
    let mut copied = false;
    for version in source.versions(id).await? {
        if let Some(entity) = source.get_version(id, version).await? {
            target.store_version(entity).await?;
            copied = true;
        }
    }
    if let Some(current) = source.get(id).await? {
        target.store(current).await?;
        copied = true;
    }
    Ok(copied)
}

/// Import every group after making sure the app versions it references exist in the
/// current store.
///
/// References are collected across all group versions first and each distinct app version
/// is recovered once, so no two workers ever write the same node.
async fn import_groups(
    legacy: &RepositorySet,
    current: &RepositorySet,
    concurrency: usize,
) -> Result<usize, StoreError> {
    let source = legacy.groups.versioned().clone();
    let target = current.groups.versioned().clone();

    let ids = source.ids().await?;
    let references = Arc::new(Mutex::new(BTreeMap::<(String, VersionId), String>::new()));
    for_each_item(ids, concurrency, |id| {
        let source = source.clone();
        let references = references.clone();
        async move {
            let mut groups = Vec::new();
            for version in source.versions(&id).await? {
                if let Some(group) = source.get_version(&id, version).await? {
                    groups.push(group);
                }
            }
            if let Some(group) = source.get(&id).await? {
                groups.push(group);
            }
            let mut references = references.lock().await;
            for group in groups {
                for (app_id, version) in group.apps {
                    references
                        .entry((app_id, version))
                        .or_insert_with(|| group.id.clone());
                }
            }
            Ok::<_, StoreError>(false)
        }
    })
    .await?;

    let references: Vec<AppReference> = std::mem::take(&mut *references.lock().await)
        .into_iter()
        .map(|((app_id, version), group_id)| AppReference {
            group_id,
            app_id,
            version,
        })
        .collect();
    debug!(count = references.len(), "checking referenced app versions");
    let legacy_apps = legacy.apps.clone();
    let current_apps = current.apps.clone();
    let recovered = for_each_item(references, concurrency, |reference| {
        let legacy_apps = legacy_apps.clone();
        let current_apps = current_apps.clone();
        async move { ensure_app_reference(&reference, &legacy_apps, &current_apps).await }
    })
    .await?;
    if recovered > 0 {
        info!(recovered, "recovered referenced app versions");
    }

    let groups = copy_versioned(source, target, concurrency).await?;
    Ok(recovered + groups)
}

/// One app version some group points at; `group_id` names a referrer for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AppReference {
    group_id: String,
    app_id: String,
    version: VersionId,
}

/// Make sure the referenced app version exists in the current store, pulling it from the
/// legacy store when the bulk copy did not carry it. Returns whether it was written.
///
/// The recovered version is written outside the retention bound; evicting it would leave
/// the group dangling.
async fn ensure_app_reference(
    reference: &AppReference,
    legacy_apps: &AppRepository,
    current_apps: &AppRepository,
) -> Result<bool, StoreError> {
    let AppReference {
        group_id,
        app_id,
        version,
    } = reference;
    if current_apps.get_version(app_id, *version).await?.is_some() {
        return Ok(false);
    }
    let recovered = match legacy_apps.get_version(app_id, *version).await? {
        Some(app) => Some(app),
        None => legacy_apps
            .get(app_id)
            .await?
            .filter(|app| app.version() == *version),
    };
    match recovered {
        Some(app) => {
            debug!(group = %group_id, app = %app_id, %version, "recovered referenced app version");
            current_apps.store_referenced_version(app).await?;
            Ok(true)
        }
        None => {
            warn!(
                group = %group_id,
                app = %app_id,
                %version,
                "group references an app version missing from the legacy store"
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        domain::App,
        repository::RepositoryFactory,
        store::{EntityStore, InMemoryStore, MemoryEntityStore},
    };

    #[test]
    fn builtin_chain_ends_at_latest() {
        let steps = builtin_steps();
        assert_eq!(steps.first().map(|s| s.from), Some(StorageVersion::ZERO));
        assert_eq!(steps.last().map(|s| s.to), Some(LATEST_STORAGE_VERSION));
        for pair in steps.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[tokio::test]
    async fn copy_versioned_carries_history_and_current() {
        let legacy = RepositoryFactory::with_entity_store(Arc::new(MemoryEntityStore::new()), 10)
            .build();
        let current =
            RepositoryFactory::with_memory_store(Arc::new(InMemoryStore::new()), 10).build();
        for v in 1..=3 {
            legacy.apps.store(App::new("/web", v)).await.unwrap();
        }
        legacy.apps.store(App::new("/db", 1)).await.unwrap();

        let copied = copy_versioned(legacy.apps.clone(), current.apps.clone(), 1)
            .await
            .unwrap();
        assert_eq!(copied, 2);
        assert_eq!(
            current.apps.versions("/web").await.unwrap(),
            legacy.apps.versions("/web").await.unwrap()
        );
        assert_eq!(
            current.apps.get("/web").await.unwrap(),
            Some(App::new("/web", 3))
        );
    }

    #[tokio::test]
    async fn missing_reference_is_pulled_from_legacy_current_record() {
        let store = Arc::new(MemoryEntityStore::new());
        let legacy = RepositoryFactory::with_entity_store(store.clone(), 10).build();
        let current =
            RepositoryFactory::with_memory_store(Arc::new(InMemoryStore::new()), 10).build();

        // Only the current record exists for /web v2, its history entry is gone.
        legacy.apps.store(App::new("/web", 2)).await.unwrap();
        store
            .expunge(&format!("app:%2Fweb:{}", crate::domain::VersionId(2).key()))
            .await
            .unwrap();
        let reference = AppReference {
            group_id: "/".to_string(),
            app_id: "/web".to_string(),
            version: crate::domain::VersionId(2),
        };

        assert!(ensure_app_reference(&reference, &legacy.apps, &current.apps)
            .await
            .unwrap());
        assert!(!ensure_app_reference(&reference, &legacy.apps, &current.apps)
            .await
            .unwrap());
        assert_eq!(
            current
                .apps
                .get_version("/web", crate::domain::VersionId(2))
                .await
                .unwrap(),
            Some(App::new("/web", 2))
        );
    }

    #[tokio::test]
    async fn fan_out_reports_first_error_after_all_workers_finish() {
        let ids: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let result = for_each_item(ids, 3, |id| async move {
            if id == "5" {
                Err(StoreError::Worker {
                    reason: "boom".to_string(),
                })
            } else {
                Ok(true)
            }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Worker { .. })));

        let copied = for_each_item(vec!["a".to_string()], 0, |_| async { Ok(false) })
            .await
            .unwrap();
        assert_eq!(copied, 0);
    }
}
