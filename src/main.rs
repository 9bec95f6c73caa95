use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use maven_vault::config::{Vault, VaultConfig};
use maven_vault::server;
use maven_vault::tasks::evict_unused::EvictUnusedItemsTask;
use maven_vault::tasks::expire_cache::ExpireCacheTask;
use maven_vault::tasks::params::{TaskParameters, EVICT_OLDER_THAN_DAYS, MIN_SNAPSHOTS_TO_KEEP, REMOVE_IF_RELEASE_EXISTS, REMOVE_OLDER_THAN_DAYS, REPOSITORY_OR_GROUP_ID, RESOURCE_STORE_PATH};
use maven_vault::tasks::reindex::{InMemoryArtifactIndexer, PublishIndexesTask, ReindexTask};
use maven_vault::tasks::snapshot_remover::SnapshotRemoverTask;
use maven_vault::tasks::Task;

#[derive(Debug, Parser)]
#[command(version, about = "A Maven repository manager")]
struct Cli {
    #[arg(short, long, default_value = "maven-vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// serve repository content over HTTP (the default)
    Serve,
    /// remove cached proxy content that was not fetched or re-checked for a while
    Evict {
        #[arg(long)]
        repository: Option<String>,
        #[arg(long)]
        older_than_days: Option<u32>,
    },
    /// make cached content below a path stale
    ExpireCache {
        #[arg(long)]
        repository: Option<String>,
        #[arg(long)]
        path: Option<String>,
    },
    RemoveSnapshots {
        #[arg(long)]
        repository: Option<String>,
        #[arg(long)]
        min_to_keep: Option<usize>,
        /// negative for no age limit
        #[arg(long, allow_hyphen_values = true)]
        older_than_days: Option<i64>,
        #[arg(long)]
        remove_if_release_exists: bool,
    },
    /// rebuild and publish the artifact index
    Reindex {
        #[arg(long)]
        repository: Option<String>,
    },
}

fn parameters(repository: &Option<String>) -> TaskParameters {
    match repository {
        Some(id) => TaskParameters::new().with(REPOSITORY_OR_GROUP_ID, id),
        None => TaskParameters::new(),
    }
}

fn with_optional(params: TaskParameters, key: &str, value: Option<impl ToString>) -> TaskParameters {
    match value {
        Some(value) => params.with(key, value),
        None => params,
    }
}

async fn run_task<T: Task>(task: T, vault: &Vault) -> anyhow::Result<T::Output> {
    info!("running task {}", task.name());
    Ok(task.run(&vault.registry).await?)
}

async fn run_command(command: Command, config: &VaultConfig, vault: Vault) -> anyhow::Result<()> {
    let registry = vault.registry.clone();
    match command {
        Command::Serve => {
            let app = server::app(Arc::new(vault));
            info!("listening on {}", config.listen);
            axum::Server::bind(&config.listen)
                .serve(app.into_make_service())
                .await?;
        }
        Command::Evict { repository, older_than_days } => {
            let params = with_optional(parameters(&repository), EVICT_OLDER_THAN_DAYS, older_than_days);
            let evicted = run_task(EvictUnusedItemsTask::from_parameters(&params, &registry)?, &vault).await?;
            info!("evicted {} items", evicted.len());
        }
        Command::ExpireCache { repository, path } => {
            let params = with_optional(parameters(&repository), RESOURCE_STORE_PATH, path);
            let expired = run_task(ExpireCacheTask::from_parameters(&params, &registry)?, &vault).await?;
            info!("expired {} cache entries", expired);
        }
        Command::RemoveSnapshots { repository, min_to_keep, older_than_days, remove_if_release_exists } => {
            let params = with_optional(parameters(&repository), MIN_SNAPSHOTS_TO_KEEP, min_to_keep);
            let params = with_optional(params, REMOVE_OLDER_THAN_DAYS, older_than_days)
                .with(REMOVE_IF_RELEASE_EXISTS, remove_if_release_exists);
            let removed = run_task(SnapshotRemoverTask::from_parameters(&params, &registry)?, &vault).await?;
            info!("removed {} snapshot files", removed.len());
        }
        Command::Reindex { repository } => {
            let params = parameters(&repository);
            let indexer = Arc::new(InMemoryArtifactIndexer::new());
            run_task(ReindexTask::from_parameters(&params, &registry, indexer.clone())?, &vault).await?;
            run_task(PublishIndexesTask::from_parameters(&params, &registry, indexer)?, &vault).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = VaultConfig::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_filter.as_deref().unwrap_or("info")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let vault = config.build().await?;
    run_command(cli.command.unwrap_or(Command::Serve), &config, vault).await
}
