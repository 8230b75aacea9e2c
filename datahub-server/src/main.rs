mod config;
use clap::{Parser, Subcommand};
use crate::config::{Config, SharedBackend};
use datahub_core::{
    HttpPeerClient, InsertContentOperation, InsertionTopic, LocalInsertionTopic,
    MemoryMigrationPositions, MigrationPositions, RedisInsertionTopic, RedisMigrationPositions,
    ReplicationDomainCache, ReplicationSyncOperation, ReplicationSyncOperationRequest,
};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "datahub")]
#[command(about = "Time-ordered channel storage with peer replication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,

        /// Validate the configuration, then exit
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datahub=info,datahub_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config, check } => {
            tracing::info!("Starting Datahub with config: {}", config);

            let cfg = match Config::from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            if check {
                tracing::info!("Configuration of hub {} is valid", cfg.hub_name);
                return;
            }

            if let Err(e) = run_hub(cfg).await {
                tracing::error!("Hub error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_hub(cfg: Config) -> datahub_core::Result<()> {
    let namespace = cfg.namespace_or_default().to_string();

    let store = cfg.storage_builder().build()?;
    tracing::info!(
        "Hub {} storing channels in {}",
        cfg.hub_name,
        cfg.storage.backend.as_str()
    );

    let topic: Arc<dyn InsertionTopic> = match cfg.eventing.backend {
        SharedBackend::Memory => Arc::new(LocalInsertionTopic::new()),
        SharedBackend::Redis => {
            Arc::new(RedisInsertionTopic::new(cfg.redis_url()?, &namespace).await?)
        }
    };

    let positions: Arc<dyn MigrationPositions> = match cfg.replication.positions {
        SharedBackend::Memory => Arc::new(MemoryMigrationPositions::new()),
        SharedBackend::Redis => {
            Arc::new(RedisMigrationPositions::new(cfg.redis_url()?, &namespace).await?)
        }
    };

    let directory = cfg.directory_builder().build().await?;
    let peer = Arc::new(HttpPeerClient::new(cfg.replication.peer_timeout())?);

    let sync = ReplicationSyncOperation::new(
        Arc::new(ReplicationDomainCache::new(directory)),
        peer,
        InsertContentOperation::new(store, topic),
        positions,
        cfg.replication.migrator_settings(),
    );

    let refresh_every = cfg.replication.refresh_every_ticks();
    let mut interval = tokio::time::interval(cfg.replication.sync_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                let force_refresh = tick > 0 && tick % refresh_every == 0;
                tick += 1;
                match sync.run(ReplicationSyncOperationRequest { force_refresh }).await {
                    Ok(result) => {
                        if !result.started.is_empty() || !result.stopped.is_empty() {
                            tracing::info!(
                                "Replication sync started {} and stopped {} migrators, {} running",
                                result.started.len(),
                                result.stopped.len(),
                                result.running
                            );
                        }
                    }
                    Err(error) => tracing::warn!("Replication sync failed: {}", error),
                }
            }
        }
    }

    tracing::info!("Shutting down hub {}", cfg.hub_name);
    sync.shutdown().await;
    Ok(())
}
