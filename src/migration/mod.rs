//! Storage schema migration.
//!
//! A run reads the version marker of the current store, applies every step whose `from`
//! is at or above it in ascending order, and writes the step's `to` as the new marker after
//! each step's writes. Step selection is gated only on the marker, so a run interrupted
//! before a marker write repeats that step from scratch; every step writes with overwrite
//! semantics.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::{
    backend::BackendDescriptor,
    id::new_ulid_string,
    repository::RepositorySet,
    store::{BoxFuture, StoreError, StoreHandle},
};

pub mod marker;
pub mod steps;

pub use marker::{StorageVersion, VersionMarker, read_marker, write_marker};
pub use steps::{LATEST_STORAGE_VERSION, builtin_steps};

pub const DEFAULT_MIGRATION_CONCURRENCY: usize = 8;

#[derive(Debug)]
pub enum MigrationError {
    /// Another run of this engine is in progress.
    AlreadyRunning,
    MarkerUnreadable {
        source: StoreError,
    },
    /// The store was migrated by a newer binary.
    UnsupportedVersion {
        found: StorageVersion,
        latest: StorageVersion,
    },
    InvalidPlan {
        reason: String,
    },
    StepFailed {
        index: usize,
        from: StorageVersion,
        to: StorageVersion,
        name: &'static str,
        source: StoreError,
    },
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "a storage migration is already running"),
            Self::MarkerUnreadable { source } => {
                write!(f, "failed to read storage version marker: {source}")
            }
            Self::UnsupportedVersion { found, latest } => write!(
                f,
                "storage version {found} is newer than the latest supported version {latest}"
            ),
            Self::InvalidPlan { reason } => write!(f, "invalid migration plan: {reason}"),
            Self::StepFailed {
                index,
                from,
                to,
                name,
                source,
            } => write!(
                f,
                "migration step {index} ({name}, {from} -> {to}) failed: {source}"
            ),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MarkerUnreadable { source } | Self::StepFailed { source, .. } => Some(source),
            Self::AlreadyRunning | Self::UnsupportedVersion { .. } | Self::InvalidPlan { .. } => {
                None
            }
        }
    }
}

/// Observable progress of the engine. Step indices count from 0 within one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationState {
    NotStarted,
    Scanning,
    Applying { step: usize, of: usize },
    Completed,
    Failed { step: Option<usize>, cause: String },
}

/// Everything a step may read from or write to. Cheap to clone.
#[derive(Clone)]
pub struct MigrationContext {
    pub current: RepositorySet,
    /// Migration source; absent when the backend has no legacy predecessor.
    pub legacy: Option<RepositorySet>,
    /// The current store, for steps that rewrite raw nodes.
    pub store: StoreHandle,
    pub concurrency: usize,
}

pub type StepAction =
    Arc<dyn Fn(MigrationContext) -> BoxFuture<'static, Result<usize, StoreError>> + Send + Sync>;

/// One schema step. The action returns how many entities it wrote.
#[derive(Clone)]
pub struct MigrationStep {
    pub from: StorageVersion,
    pub to: StorageVersion,
    pub name: &'static str,
    action: StepAction,
}

impl MigrationStep {
    pub fn new<F>(from: StorageVersion, to: StorageVersion, name: &'static str, action: F) -> Self
    where
        F: Fn(MigrationContext) -> BoxFuture<'static, Result<usize, StoreError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            from,
            to,
            name,
            action: Arc::new(action),
        }
    }
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: &'static str,
    pub from: StorageVersion,
    pub to: StorageVersion,
    pub entities_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub from: StorageVersion,
    pub to: StorageVersion,
    pub applied: Vec<StepReport>,
}

fn validate_plan(steps: &[MigrationStep]) -> Result<(), MigrationError> {
    for step in steps {
        if step.to <= step.from {
            return Err(MigrationError::InvalidPlan {
                reason: format!(
                    "step {} does not move forward ({} -> {})",
                    step.name, step.from, step.to
                ),
            });
        }
    }
    for pair in steps.windows(2) {
        if pair[1].from != pair[0].to {
            return Err(MigrationError::InvalidPlan {
                reason: format!(
                    "step {} starts at {} but {} ends at {}",
                    pair[1].name, pair[1].from, pair[0].name, pair[0].to
                ),
            });
        }
    }
    Ok(())
}

pub struct Migration {
    current: RepositorySet,
    legacy: Option<RepositorySet>,
    legacy_descriptor: Option<BackendDescriptor>,
    store: Option<StoreHandle>,
    concurrency: usize,
    steps: Vec<MigrationStep>,
    state: watch::Sender<MigrationState>,
    running: Mutex<()>,
}

impl Migration {
    /// Engine with the built-in step chain. `store` is `None` for in-memory backends.
    pub fn new(
        current: RepositorySet,
        legacy: Option<RepositorySet>,
        legacy_descriptor: Option<BackendDescriptor>,
        store: Option<StoreHandle>,
        concurrency: usize,
    ) -> Self {
        let (state, _) = watch::channel(MigrationState::NotStarted);
        Self {
            current,
            legacy,
            legacy_descriptor,
            store,
            concurrency: concurrency.max(1),
            steps: builtin_steps(),
            state,
            running: Mutex::new(()),
        }
    }

    /// Replace the step chain. Steps must form a contiguous ascending chain.
    pub fn with_steps(mut self, steps: Vec<MigrationStep>) -> Result<Self, MigrationError> {
        validate_plan(&steps)?;
        self.steps = steps;
        Ok(self)
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn latest_version(&self) -> StorageVersion {
        self.steps
            .last()
            .map(|step| step.to)
            .unwrap_or(StorageVersion::ZERO)
    }

    pub fn legacy_source(&self) -> Option<&BackendDescriptor> {
        self.legacy_descriptor.as_ref()
    }

    pub fn state(&self) -> MigrationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationState> {
        self.state.subscribe()
    }

    /// Persisted marker of the current store; `None` when absent or for in-memory backends.
    pub async fn storage_version(&self) -> Result<Option<StorageVersion>, MigrationError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        read_marker(store)
            .await
            .map(|marker| marker.map(|m| m.version))
            .map_err(|source| MigrationError::MarkerUnreadable { source })
    }

    fn fail(&self, step: Option<usize>, err: MigrationError) -> MigrationError {
        self.state.send_replace(MigrationState::Failed {
            step,
            cause: err.to_string(),
        });
        err
    }

    /// Bring the current store up to the latest storage version.
    ///
    /// Must complete before the store serves regular traffic. A failed run leaves the
    /// marker at the last completed step.
    pub async fn migrate(&self) -> Result<MigrationOutcome, MigrationError> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(MigrationError::AlreadyRunning);
        };
        let latest = self.latest_version();
        let run_id = new_ulid_string();

        let Some(store) = self.store.clone() else {
            info!(run_id = %run_id, "in-memory storage backend, nothing to migrate");
            self.state.send_replace(MigrationState::Completed);
            return Ok(MigrationOutcome {
                from: latest,
                to: latest,
                applied: Vec::new(),
            });
        };

        self.state.send_replace(MigrationState::Scanning);
        let marker = match read_marker(&store).await {
            Ok(marker) => marker.map(|m| m.version).unwrap_or(StorageVersion::ZERO),
            Err(source) => {
                return Err(self.fail(None, MigrationError::MarkerUnreadable { source }));
            }
        };
        if marker > latest {
            return Err(self.fail(
                None,
                MigrationError::UnsupportedVersion {
                    found: marker,
                    latest,
                },
            ));
        }

        let pending: Vec<&MigrationStep> =
            self.steps.iter().filter(|step| step.from >= marker).collect();
        info!(
            run_id = %run_id,
            store = %store.id(),
            from = %marker,
            latest = %latest,
            pending = pending.len(),
            legacy_source = self.legacy_descriptor.as_ref().map(|d| d.kind_name()),
            "scanned storage version"
        );
        if pending.is_empty() {
            self.state.send_replace(MigrationState::Completed);
            return Ok(MigrationOutcome {
                from: marker,
                to: marker,
                applied: Vec::new(),
            });
        }
        if self.legacy.is_none() && marker == StorageVersion::ZERO {
            warn!(run_id = %run_id, "no legacy source configured; import steps will write nothing");
        }

        let ctx = MigrationContext {
            current: self.current.clone(),
            legacy: self.legacy.clone(),
            store: store.clone(),
            concurrency: self.concurrency,
        };
        let of = pending.len();
        let mut applied = Vec::with_capacity(of);
        let mut reached = marker;
        for (index, step) in pending.into_iter().enumerate() {
            self.state
                .send_replace(MigrationState::Applying { step: index, of });
            info!(run_id = %run_id, step = step.name, from = %step.from, to = %step.to, "applying migration step");

            let result = match (step.action)(ctx.clone()).await {
                Ok(written) => write_marker(&store, step.to).await.map(|()| written),
                Err(e) => Err(e),
            };
            let entities_written = match result {
                Ok(written) => written,
                Err(source) => {
                    error!(
                        run_id = %run_id,
                        step = step.name,
                        from = %step.from,
                        to = %step.to,
                        error = %source,
                        "migration step failed"
                    );
                    return Err(self.fail(
                        Some(index),
                        MigrationError::StepFailed {
                            index,
                            from: step.from,
                            to: step.to,
                            name: step.name,
                            source,
                        },
                    ));
                }
            };

            info!(
                run_id = %run_id,
                step = step.name,
                to = %step.to,
                entities_written,
                "migration step completed"
            );
            reached = step.to;
            applied.push(StepReport {
                name: step.name,
                from: step.from,
                to: step.to,
                entities_written,
            });
        }

        self.state.send_replace(MigrationState::Completed);
        Ok(MigrationOutcome {
            from: marker,
            to: reached,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        domain::{App, EventSubscribers, FrameworkId, Group, Task, TaskState, VersionId},
        repository::{Repository, RepositoryFactory},
        store::{InMemoryStore, MemoryEntityStore, NodePath, PersistenceStore, StoreId},
    };

    fn marker_key() -> String {
        NodePath::new(marker::MARKER_NODE).unwrap().to_string()
    }

    struct Fixture {
        nodes: Arc<InMemoryStore>,
        current: RepositorySet,
        legacy: RepositorySet,
    }

    impl Fixture {
        fn new() -> Self {
            let nodes = Arc::new(InMemoryStore::new());
            Self {
                current: RepositoryFactory::with_memory_store(nodes.clone(), 10).build(),
                legacy: RepositoryFactory::with_entity_store(
                    Arc::new(MemoryEntityStore::new()),
                    10,
                )
                .build(),
                nodes,
            }
        }

        fn migration(&self) -> Migration {
            self.migration_over(StoreHandle::Persistent(self.nodes.clone()))
        }

        fn migration_over(&self, store: StoreHandle) -> Migration {
            Migration::new(
                self.current.clone(),
                Some(self.legacy.clone()),
                None,
                Some(store),
                4,
            )
        }

        async fn marker(&self) -> Option<StorageVersion> {
            read_marker(&StoreHandle::Persistent(self.nodes.clone()))
                .await
                .unwrap()
                .map(|m| m.version)
        }

        async fn entities(&self) -> BTreeMap<String, Vec<u8>> {
            let mut snapshot = self.nodes.snapshot().await;
            snapshot.remove(&marker_key());
            snapshot
        }
    }

    async fn seed_legacy(legacy: &RepositorySet) {
        let web = App::new("web", 1);
        legacy.apps.store(web.clone()).await.unwrap();
        legacy
            .groups
            .store(Group::new("/prod", 1).with_app(&web))
            .await
            .unwrap();
        legacy
            .tasks
            .store(Task {
                task_id: "web.1".to_string(),
                app_id: "web".to_string(),
                app_version: VersionId(1),
                agent_id: None,
                state: TaskState::Running,
                staged_at: "2024-05-01T10:00:00Z".to_string(),
            })
            .await
            .unwrap();
        legacy
            .framework_id
            .store(FrameworkId {
                id: "fw-1".to_string(),
            })
            .await
            .unwrap();
        legacy
            .event_subscribers
            .store(EventSubscribers {
                urls: ["http://hooks.local/events".to_string()].into(),
            })
            .await
            .unwrap();
    }

    fn recording_steps(log: Arc<std::sync::Mutex<Vec<&'static str>>>) -> Vec<MigrationStep> {
        let names = ["zero", "one", "two", "three"];
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let log = log.clone();
                MigrationStep::new(
                    StorageVersion(i as u32),
                    StorageVersion(i as u32 + 1),
                    name,
                    move |_ctx| {
                        let log = log.clone();
                        Box::pin(async move {
                            log.lock().unwrap().push(name);
                            Ok(0)
                        })
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn applies_only_steps_at_or_above_marker_in_order() {
        let fx = Fixture::new();
        let handle = StoreHandle::Persistent(fx.nodes.clone());
        write_marker(&handle, StorageVersion(2)).await.unwrap();

        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let migration = fx.migration().with_steps(recording_steps(log.clone())).unwrap();
        let outcome = migration.migrate().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["two", "three"]);
        assert_eq!(outcome.from, StorageVersion(2));
        assert_eq!(outcome.to, StorageVersion(4));
        assert_eq!(fx.marker().await, Some(StorageVersion(4)));
        assert_eq!(migration.state(), MigrationState::Completed);
    }

    #[tokio::test]
    async fn legacy_app_and_group_survive_import() {
        let fx = Fixture::new();
        seed_legacy(&fx.legacy).await;

        let outcome = fx.migration().migrate().await.unwrap();
        assert_eq!(outcome.from, StorageVersion::ZERO);
        assert_eq!(outcome.to, LATEST_STORAGE_VERSION);
        assert_eq!(
            outcome
                .applied
                .iter()
                .map(|r| r.entities_written)
                .collect::<Vec<_>>(),
            vec![2, 1, 2, 0]
        );

        assert_eq!(
            fx.current.apps.get("web").await.unwrap(),
            Some(App::new("web", 1))
        );
        let group = fx.current.groups.get("/prod").await.unwrap().unwrap();
        let resolved = fx.current.groups.resolve(&group).await.unwrap();
        assert_eq!(resolved.apps, vec![App::new("web", 1)]);
        assert_eq!(
            fx.current
                .framework_id
                .get(crate::domain::FRAMEWORK_ID_KEY)
                .await
                .unwrap()
                .map(|f| f.id),
            Some("fw-1".to_string())
        );
    }

    #[tokio::test]
    async fn second_run_performs_no_writes() {
        let fx = Fixture::new();
        seed_legacy(&fx.legacy).await;
        let migration = fx.migration();
        migration.migrate().await.unwrap();

        let before = fx.nodes.snapshot().await;
        let mutations = fx.nodes.mutation_count();
        let outcome = migration.migrate().await.unwrap();

        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.from, LATEST_STORAGE_VERSION);
        assert_eq!(fx.nodes.mutation_count(), mutations);
        assert_eq!(fx.nodes.snapshot().await, before);
    }

    #[tokio::test]
    async fn empty_legacy_source_still_advances_marker() {
        let fx = Fixture::new();
        let outcome = fx.migration().migrate().await.unwrap();
        assert_eq!(outcome.applied.len(), 4);
        assert!(outcome.applied.iter().all(|r| r.entities_written == 0));
        assert_eq!(fx.marker().await, Some(LATEST_STORAGE_VERSION));
        assert!(fx.entities().await.is_empty());
        assert!(fx.current.apps.ids().await.unwrap().is_empty());
    }

    /// Fails the first `n` marker writes; everything else goes to the wrapped store.
    struct FailingMarkerStore {
        inner: Arc<InMemoryStore>,
        remaining: AtomicUsize,
    }

    impl PersistenceStore for FailingMarkerStore {
        fn id(&self) -> &StoreId {
            self.inner.id()
        }

        fn read<'a>(
            &'a self,
            path: &'a NodePath,
        ) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
            self.inner.read(path)
        }

        fn write<'a>(
            &'a self,
            path: &'a NodePath,
            data: Vec<u8>,
        ) -> BoxFuture<'a, Result<(), StoreError>> {
            if path.to_string() == marker_key()
                && self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Box::pin(async {
                    Err(StoreError::Unavailable {
                        reason: "connection lost".to_string(),
                    })
                });
            }
            self.inner.write(path, data)
        }

        fn children<'a>(
            &'a self,
            path: &'a NodePath,
        ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
            self.inner.children(path)
        }

        fn delete<'a>(&'a self, path: &'a NodePath) -> BoxFuture<'a, Result<bool, StoreError>> {
            self.inner.delete(path)
        }
    }

    #[tokio::test]
    async fn interrupted_step_is_reapplied_to_the_same_end_state() {
        let reference = Fixture::new();
        seed_legacy(&reference.legacy).await;
        reference.migration().migrate().await.unwrap();

        let fx = Fixture::new();
        seed_legacy(&fx.legacy).await;
        let flaky = Arc::new(FailingMarkerStore {
            inner: fx.nodes.clone(),
            remaining: AtomicUsize::new(1),
        });
        let migration = fx.migration_over(StoreHandle::Persistent(flaky));

        let err = migration.migrate().await.unwrap_err();
        assert!(
            matches!(
                err,
                MigrationError::StepFailed {
                    index: 0,
                    name: "import-legacy-apps-and-groups",
                    ..
                }
            ),
            "{err}"
        );
        assert!(matches!(
            migration.state(),
            MigrationState::Failed { step: Some(0), .. }
        ));
        assert_eq!(fx.marker().await, None);

        let outcome = migration.migrate().await.unwrap();
        assert_eq!(outcome.from, StorageVersion::ZERO);
        assert_eq!(outcome.applied.len(), 4);
        assert_eq!(fx.marker().await, Some(LATEST_STORAGE_VERSION));
        assert_eq!(fx.entities().await, reference.entities().await);
    }

    #[tokio::test]
    async fn failing_step_stops_the_run_at_its_marker() {
        let fx = Fixture::new();
        let steps = vec![
            MigrationStep::new(StorageVersion(0), StorageVersion(1), "ok", |_| {
                Box::pin(async { Ok(0) })
            }),
            MigrationStep::new(StorageVersion(1), StorageVersion(2), "broken", |_| {
                Box::pin(async {
                    Err(StoreError::Corrupt {
                        key: "/apps/x".to_string(),
                        reason: "bad json".to_string(),
                    })
                })
            }),
        ];
        let migration = fx.migration().with_steps(steps).unwrap();
        let err = migration.migrate().await.unwrap_err();

        assert!(err.to_string().contains("broken, 1 -> 2"), "{err}");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(fx.marker().await, Some(StorageVersion(1)));
        assert!(matches!(
            migration.state(),
            MigrationState::Failed { step: Some(1), .. }
        ));
    }

    #[tokio::test]
    async fn marker_from_newer_binary_is_rejected() {
        let fx = Fixture::new();
        write_marker(
            &StoreHandle::Persistent(fx.nodes.clone()),
            StorageVersion(LATEST_STORAGE_VERSION.0 + 1),
        )
        .await
        .unwrap();

        let migration = fx.migration();
        let err = migration.migrate().await.unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedVersion { .. }));
        assert!(matches!(
            migration.state(),
            MigrationState::Failed { step: None, .. }
        ));
    }

    #[test]
    fn broken_chains_are_rejected() {
        let fx = Fixture::new();
        let noop = |_: MigrationContext| -> BoxFuture<'static, Result<usize, StoreError>> {
            Box::pin(async { Ok(0) })
        };
        let gap = vec![
            MigrationStep::new(StorageVersion(0), StorageVersion(1), "a", noop),
            MigrationStep::new(StorageVersion(2), StorageVersion(3), "b", noop),
        ];
        assert!(matches!(
            fx.migration().with_steps(gap),
            Err(MigrationError::InvalidPlan { .. })
        ));

        let backwards = vec![MigrationStep::new(
            StorageVersion(3),
            StorageVersion(1),
            "c",
            noop,
        )];
        assert!(matches!(
            fx.migration().with_steps(backwards),
            Err(MigrationError::InvalidPlan { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let fx = Fixture::new();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let step = {
            let started = started.clone();
            let release = release.clone();
            MigrationStep::new(StorageVersion(0), StorageVersion(1), "slow", move |_| {
                let started = started.clone();
                let release = release.clone();
                Box::pin(async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(0)
                })
            })
        };
        let migration = Arc::new(fx.migration().with_steps(vec![step]).unwrap());
        let mut states = migration.subscribe();

        let first = tokio::spawn({
            let migration = migration.clone();
            async move { migration.migrate().await }
        });
        started.notified().await;
        assert_eq!(
            *states.borrow_and_update(),
            MigrationState::Applying { step: 0, of: 1 }
        );
        assert!(matches!(
            migration.migrate().await,
            Err(MigrationError::AlreadyRunning)
        ));

        release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(migration.state(), MigrationState::Completed);
        assert!(migration.migrate().await.unwrap().applied.is_empty());
    }

    #[tokio::test]
    async fn in_memory_backend_never_migrates() {
        let fx = Fixture::new();
        let migration = Migration::new(fx.current.clone(), None, None, None, 1);
        let outcome = migration.migrate().await.unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(migration.state(), MigrationState::Completed);
        assert_eq!(migration.storage_version().await.unwrap(), None);
        assert_eq!(fx.nodes.mutation_count(), 0);
    }

    #[tokio::test]
    async fn old_framework_id_node_moves_under_framework() {
        let fx = Fixture::new();
        fx.nodes
            .write(
                &NodePath::new([steps::OLD_FRAMEWORK_ID_NODE]).unwrap(),
                b"fw-legacy\n".to_vec(),
            )
            .await
            .unwrap();
        write_marker(&StoreHandle::Persistent(fx.nodes.clone()), StorageVersion(3))
            .await
            .unwrap();

        let outcome = fx.migration().migrate().await.unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].entities_written, 1);
        assert_eq!(
            fx.current
                .framework_id
                .get(crate::domain::FRAMEWORK_ID_KEY)
                .await
                .unwrap(),
            Some(FrameworkId {
                id: "fw-legacy".to_string()
            })
        );
        assert_eq!(
            fx.nodes
                .read(&NodePath::new([steps::OLD_FRAMEWORK_ID_NODE]).unwrap())
                .await
                .unwrap(),
            None
        );
    }
}
