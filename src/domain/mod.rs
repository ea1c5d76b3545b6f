use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Version of a versioned entity (apps and groups).
///
/// Ordering matters: history is listed and evicted oldest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl VersionId {
    /// Fixed-width form used in store keys so lexical order equals numeric order.
    pub fn key(&self) -> String {
        format!("{:020}", self.0)
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        key.parse::<u64>().ok().map(Self)
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    App,
    Task,
    DeploymentPlan,
    TaskFailure,
    Group,
    FrameworkId,
    EventSubscribers,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::App,
        EntityKind::Task,
        EntityKind::DeploymentPlan,
        EntityKind::TaskFailure,
        EntityKind::Group,
        EntityKind::FrameworkId,
        EntityKind::EventSubscribers,
    ];

    /// Top-level node name in the coordination store layout.
    pub fn category(&self) -> &'static str {
        match self {
            Self::App => "apps",
            Self::Task => "tasks",
            Self::DeploymentPlan => "deployments",
            Self::TaskFailure => "task-failures",
            Self::Group => "groups",
            Self::FrameworkId => "framework",
            Self::EventSubscribers => "event-subscribers",
        }
    }

    /// Key prefix in the legacy flat entity store.
    pub fn legacy_prefix(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Task => "task",
            Self::DeploymentPlan => "deployment",
            Self::TaskFailure => "taskFailure",
            Self::Group => "group",
            Self::FrameworkId => "framework",
            Self::EventSubscribers => "events",
        }
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, Self::App | Self::Group)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.category())
    }
}

/// An entity persisted by a repository.
pub trait Entity:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    const KIND: EntityKind;

    fn entity_id(&self) -> String;

    /// `Some` for kinds that keep history.
    fn entity_version(&self) -> Option<VersionId> {
        None
    }
}

/// Entity kinds that keep a version history next to the current record.
pub trait Versioned: Entity {
    fn version(&self) -> VersionId;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub id: String,
    pub version: VersionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_instances() -> u32 {
    1
}

impl App {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version: VersionId(version),
            cmd: None,
            instances: default_instances(),
            labels: BTreeMap::new(),
        }
    }
}

impl Entity for App {
    const KIND: EntityKind = EntityKind::App;

    fn entity_id(&self) -> String {
        self.id.clone()
    }

    fn entity_version(&self) -> Option<VersionId> {
        Some(self.version)
    }
}

impl Versioned for App {
    fn version(&self) -> VersionId {
        self.version
    }
}

/// A group of apps and child groups.
///
/// Member apps are referenced by id and version; the app records themselves live in the
/// app repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub version: VersionId,
    #[serde(default)]
    pub apps: BTreeMap<String, VersionId>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl Group {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version: VersionId(version),
            apps: BTreeMap::new(),
            groups: BTreeSet::new(),
        }
    }

    pub fn with_app(mut self, app: &App) -> Self {
        self.apps.insert(app.id.clone(), app.version);
        self
    }
}

impl Entity for Group {
    const KIND: EntityKind = EntityKind::Group;

    fn entity_id(&self) -> String {
        self.id.clone()
    }

    fn entity_version(&self) -> Option<VersionId> {
        Some(self.version)
    }
}

impl Versioned for Group {
    fn version(&self) -> VersionId {
        self.version
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Staging,
    Running,
    Finished,
    Failed,
    Killed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub task_id: String,
    pub app_id: String,
    pub app_version: VersionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub state: TaskState,
    /// RFC 3339.
    pub staged_at: String,
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn entity_id(&self) -> String {
        self.task_id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub id: String,
    pub original_version: VersionId,
    pub target_version: VersionId,
    #[serde(default)]
    pub affected_apps: BTreeSet<String>,
}

impl Entity for DeploymentPlan {
    const KIND: EntityKind = EntityKind::DeploymentPlan;

    fn entity_id(&self) -> String {
        self.id.clone()
    }
}

/// Last task failure recorded for an app, keyed by app id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFailure {
    pub app_id: String,
    pub version: VersionId,
    pub task_id: String,
    pub message: String,
    /// RFC 3339.
    pub timestamp: String,
}

impl Entity for TaskFailure {
    const KIND: EntityKind = EntityKind::TaskFailure;

    fn entity_id(&self) -> String {
        self.app_id.clone()
    }
}

pub const FRAMEWORK_ID_KEY: &str = "framework-id";
pub const EVENT_SUBSCRIBERS_KEY: &str = "http-event-callbacks";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameworkId {
    pub id: String,
}

impl Entity for FrameworkId {
    const KIND: EntityKind = EntityKind::FrameworkId;

    fn entity_id(&self) -> String {
        FRAMEWORK_ID_KEY.to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSubscribers {
    #[serde(default)]
    pub urls: BTreeSet<String>,
}

impl Entity for EventSubscribers {
    const KIND: EntityKind = EntityKind::EventSubscribers;

    fn entity_id(&self) -> String {
        EVENT_SUBSCRIBERS_KEY.to_string()
    }
}
