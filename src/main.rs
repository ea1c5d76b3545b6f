use anyhow::{Context, Result};

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use orca_storage::{
    config::{Cli, Command, Config},
    migration::{LATEST_STORAGE_VERSION, StorageVersion},
    module::StorageModule,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli.command.clone().unwrap_or(Command::Migrate);

    match cmd {
        Command::Migrate => migrate(&cli.config).await,
        Command::Status => status(&cli.config).await,
    }
}

async fn open_module(config: &Config) -> Result<StorageModule> {
    let (current, legacy) = config.resolve_backends()?;
    StorageModule::build(current, legacy, config.storage_options())
        .await
        .context("open storage")
}

async fn migrate(config: &Config) -> Result<()> {
    let module = open_module(config).await?;

    let outcome = tokio::select! {
        result = module.migrate() => result.context("storage migration failed")?,
        _ = shutdown_signal() => {
            warn!("interrupted; the next run resumes from the last completed step");
            anyhow::bail!("storage migration interrupted");
        }
    };
    info!(
        from = %outcome.from,
        to = %outcome.to,
        steps = outcome.applied.len(),
        "storage is up to date"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[derive(Serialize)]
struct StatusReport<'a> {
    backend: &'a str,
    store_dir: Option<String>,
    in_memory: bool,
    storage_version: Option<StorageVersion>,
    latest_version: StorageVersion,
    legacy_source: Option<&'a str>,
}

async fn status(config: &Config) -> Result<()> {
    let module = open_module(config).await?;
    let storage_version = module
        .migration()
        .storage_version()
        .await
        .context("read storage version")?;

    let descriptor = module.descriptor();
    let report = StatusReport {
        backend: descriptor.kind_name(),
        store_dir: descriptor
            .connection()
            .map(|c| c.store_dir().display().to_string()),
        in_memory: descriptor.is_in_memory(),
        storage_version,
        latest_version: LATEST_STORAGE_VERSION,
        legacy_source: module.migration().legacy_source().map(|d| d.kind_name()),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
