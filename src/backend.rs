//! Backend descriptor resolution.
//!
//! Maps the configured store identifier to the backend family that serves it and, when
//! stored data may predate the current layout, to a second descriptor used only as the
//! migration source.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

pub const DEFAULT_NAMESPACE: &str = "orca";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_VERSIONS: usize = 50;

/// Name of the nested section that selects an explicit migration source.
pub const LEGACY_MIGRATION_SECTION: &str = "legacy-migration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownBackend { name: String },
    InvalidParameter { field: &'static str, reason: String },
    InvalidNode { reason: String },
    InvalidLegacyMigration { reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownBackend { name } => write!(
                f,
                "unknown internal store backend {name:?} (expected one of: {})",
                backend_identifiers().collect::<Vec<_>>().join(", ")
            ),
            Self::InvalidParameter { field, reason } => {
                write!(f, "invalid storage parameter {field}: {reason}")
            }
            Self::InvalidNode { reason } => write!(f, "invalid storage config: {reason}"),
            Self::InvalidLegacyMigration { reason } => {
                write!(f, "invalid {LEGACY_MIGRATION_SECTION} config: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where a coordination store lives and how long a single operation may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub root: PathBuf,
    pub namespace: String,
    pub timeout: Duration,
}

impl ConnectionParams {
    pub fn store_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyVariant {
    /// Flat entity files inside the coordination store directory.
    ZkCompat,
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendDescriptor {
    InMemory {
        max_versions: usize,
    },
    CurrentStore {
        connection: ConnectionParams,
        max_versions: usize,
    },
    LegacyStore {
        /// Configured identifier, kept for diagnostics.
        name: String,
        variant: LegacyVariant,
        connection: ConnectionParams,
        max_versions: usize,
        cache: bool,
    },
}

impl BackendDescriptor {
    pub fn kind_name(&self) -> &str {
        match self {
            Self::InMemory { .. } => "mem",
            Self::CurrentStore { .. } => "zk",
            Self::LegacyStore { name, .. } => name,
        }
    }

    pub fn max_versions(&self) -> usize {
        match self {
            Self::InMemory { max_versions }
            | Self::CurrentStore { max_versions, .. }
            | Self::LegacyStore { max_versions, .. } => *max_versions,
        }
    }

    pub fn connection(&self) -> Option<&ConnectionParams> {
        match self {
            Self::InMemory { .. } => None,
            Self::CurrentStore { connection, .. } | Self::LegacyStore { connection, .. } => {
                Some(connection)
            }
        }
    }

    /// Backends whose data does not outlive the process; these never need migration.
    pub fn is_in_memory(&self) -> bool {
        matches!(
            self,
            Self::InMemory { .. }
                | Self::LegacyStore {
                    variant: LegacyVariant::InMemory,
                    ..
                }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendFamily {
    InMemory,
    Current,
    Legacy { variant: LegacyVariant, cache: bool },
}

/// Every accepted identifier. `legacy_zk` and `legacy_zk_mesos` are aliases of one family.
const BACKENDS: &[(&str, BackendFamily)] = &[
    ("mem", BackendFamily::InMemory),
    ("zk", BackendFamily::Current),
    (
        "legacy_zk",
        BackendFamily::Legacy {
            variant: LegacyVariant::ZkCompat,
            cache: true,
        },
    ),
    (
        "legacy_zk_mesos",
        BackendFamily::Legacy {
            variant: LegacyVariant::ZkCompat,
            cache: true,
        },
    ),
    (
        "legacy_mem",
        BackendFamily::Legacy {
            variant: LegacyVariant::InMemory,
            cache: false,
        },
    ),
];

/// Identifier of the legacy family that reads data left in a current store directory.
const IN_PLACE_LEGACY_NAME: &str = "legacy_zk";

fn lookup_backend(name: &str) -> Option<BackendFamily> {
    BACKENDS
        .iter()
        .find(|(id, _)| *id == name)
        .map(|(_, family)| *family)
}

pub fn backend_identifiers() -> impl Iterator<Item = &'static str> {
    BACKENDS.iter().map(|(id, _)| *id)
}

/// Flat storage settings as provided by the command line or environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub backend: String,
    pub root: PathBuf,
    pub namespace: String,
    pub timeout: Duration,
    pub max_versions: usize,
}

impl StorageSettings {
    pub fn new(backend: impl Into<String>, root: impl AsRef<Path>) -> Self {
        Self {
            backend: backend.into(),
            root: root.as_ref().to_path_buf(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_versions == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "max_versions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::InvalidParameter {
                field: "namespace",
                reason: "must not be empty".to_string(),
            });
        }
        if self.namespace.contains(['/', '\\']) || self.namespace.starts_with('.') {
            return Err(ConfigError::InvalidParameter {
                field: "namespace",
                reason: format!("must be a single path segment, got {:?}", self.namespace),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidParameter {
                field: "timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    fn connection(&self) -> ConnectionParams {
        ConnectionParams {
            root: self.root.clone(),
            namespace: self.namespace.clone(),
            timeout: self.timeout,
        }
    }
}

fn descriptor_for(settings: &StorageSettings) -> Result<(BackendFamily, BackendDescriptor), ConfigError> {
    settings.validate()?;
    let family = lookup_backend(&settings.backend).ok_or_else(|| ConfigError::UnknownBackend {
        name: settings.backend.clone(),
    })?;
    let max_versions = settings.max_versions;
    let descriptor = match family {
        BackendFamily::InMemory => BackendDescriptor::InMemory { max_versions },
        BackendFamily::Current => BackendDescriptor::CurrentStore {
            connection: settings.connection(),
            max_versions,
        },
        BackendFamily::Legacy { variant, cache } => BackendDescriptor::LegacyStore {
            name: settings.backend.clone(),
            variant,
            connection: settings.connection(),
            max_versions,
            cache,
        },
    };
    Ok((family, descriptor))
}

/// Resolve the active backend and, for the current coordination store, the in-place legacy
/// reader used as migration source.
pub fn resolve(
    settings: &StorageSettings,
) -> Result<(BackendDescriptor, Option<BackendDescriptor>), ConfigError> {
    let (family, current) = descriptor_for(settings)?;
    let legacy = match family {
        BackendFamily::Current => Some(BackendDescriptor::LegacyStore {
            name: IN_PLACE_LEGACY_NAME.to_string(),
            variant: LegacyVariant::ZkCompat,
            connection: settings.connection(),
            max_versions: settings.max_versions,
            cache: false,
        }),
        BackendFamily::InMemory | BackendFamily::Legacy { .. } => None,
    };
    Ok((current, legacy))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct StorageNode {
    backend: String,
    #[serde(default)]
    root: Option<PathBuf>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    max_versions: Option<usize>,
    #[serde(default)]
    legacy_migration: Option<serde_yaml::Value>,
}

impl StorageNode {
    fn settings(&self, base: &StorageSettings) -> StorageSettings {
        StorageSettings {
            backend: self.backend.clone(),
            root: self.root.clone().unwrap_or_else(|| base.root.clone()),
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| base.namespace.clone()),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
            max_versions: self.max_versions.unwrap_or(base.max_versions),
        }
    }
}

/// Resolve a structured storage node.
///
/// Fields missing from the node fall back to `base`. A nested `legacy-migration` section
/// selects the migration source explicitly and replaces the in-place legacy reader; its own
/// missing fields fall back to the resolved current settings.
pub fn resolve_node(
    node: &serde_yaml::Value,
    base: &StorageSettings,
) -> Result<(BackendDescriptor, Option<BackendDescriptor>), ConfigError> {
    let parsed: StorageNode =
        serde_yaml::from_value(node.clone()).map_err(|e| ConfigError::InvalidNode {
            reason: e.to_string(),
        })?;
    let settings = parsed.settings(base);
    let (current, implicit_legacy) = resolve(&settings)?;

    let Some(section) = parsed.legacy_migration.as_ref() else {
        return Ok((current, implicit_legacy));
    };

    let legacy_node: StorageNode = serde_yaml::from_value(section.clone()).map_err(|e| {
        ConfigError::InvalidLegacyMigration {
            reason: e.to_string(),
        }
    })?;
    if legacy_node.legacy_migration.is_some() {
        return Err(ConfigError::InvalidLegacyMigration {
            reason: format!("nested {LEGACY_MIGRATION_SECTION} sections are not supported"),
        });
    }
    let (_family, legacy) = descriptor_for(&legacy_node.settings(&settings)).map_err(|e| {
        ConfigError::InvalidLegacyMigration {
            reason: e.to_string(),
        }
    })?;
    Ok((current, Some(legacy)))
}
