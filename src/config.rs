use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::{
    backend::{self, BackendDescriptor, StorageSettings},
    module::StorageOptions,
};

/// Top-level key of the configuration file that holds the storage node.
pub const STORAGE_SECTION: &str = "storage";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "orca-storage",
    about = "Orchestrator storage backend and schema migration tool",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Bring the configured store up to the latest storage version (default).
    Migrate,

    /// Print the configured backend and its persisted storage version.
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// YAML file with a `storage` node; overrides the flat storage flags it sets.
    #[arg(long = "config", global = true, env = "ORCA_CONFIG", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "ORCA_INTERNAL_STORE_BACKEND",
        value_name = "NAME",
        default_value = "zk"
    )]
    pub internal_store_backend: String,

    #[arg(
        long,
        global = true,
        env = "ORCA_DATA_DIR",
        value_name = "PATH",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        global = true,
        env = "ORCA_ZK_NAMESPACE",
        value_name = "NAME",
        default_value = backend::DEFAULT_NAMESPACE
    )]
    pub zk_namespace: String,

    #[arg(
        long = "zk-timeout-secs",
        global = true,
        env = "ORCA_ZK_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = backend::DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub zk_timeout_secs: u64,

    #[arg(
        long = "max-versions",
        global = true,
        env = "ORCA_MAX_VERSIONS",
        value_name = "N",
        default_value_t = backend::DEFAULT_MAX_VERSIONS as u64,
        value_parser = clap::value_parser!(u64).range(1..=10_000)
    )]
    pub max_versions: u64,

    #[arg(
        long = "migration-concurrency",
        global = true,
        env = "ORCA_MIGRATION_CONCURRENCY",
        value_name = "N",
        default_value_t = 8,
        value_parser = clap::value_parser!(u64).range(1..=64)
    )]
    pub migration_concurrency: u64,
}

impl Config {
    pub fn storage_settings(&self) -> StorageSettings {
        StorageSettings {
            backend: self.internal_store_backend.clone(),
            root: self.data_dir.clone(),
            namespace: self.zk_namespace.clone(),
            timeout: Duration::from_secs(self.zk_timeout_secs),
            max_versions: self.max_versions as usize,
        }
    }

    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            migration_concurrency: self.migration_concurrency as usize,
        }
    }

    /// Resolve the active backend and its migration source from the file (when given) or
    /// the flat flags.
    pub fn resolve_backends(
        &self,
    ) -> anyhow::Result<(BackendDescriptor, Option<BackendDescriptor>)> {
        let settings = self.storage_settings();
        let resolved = match &self.config_file {
            Some(path) => {
                let node = load_storage_node(path)?;
                backend::resolve_node(&node, &settings)
                    .with_context(|| format!("resolve storage config in {}", path.display()))?
            }
            None => backend::resolve(&settings).context("resolve storage backend")?,
        };
        Ok(resolved)
    }
}

/// Read the `storage` node of a YAML configuration file.
pub fn load_storage_node(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("parse config file {}", path.display()))?;
    doc.get(STORAGE_SECTION).cloned().ok_or_else(|| {
        anyhow::anyhow!(
            "config file {} has no `{STORAGE_SECTION}` section",
            path.display()
        )
    })
}
