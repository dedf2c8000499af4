//! ShardSync - Distributed Partition-Map Metadata Replication
//!
//! Daemon entry point: wires the local metadata store, the cluster config
//! directory, the peer-facing metadata service, and the replication
//! orchestrator, then runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardsync::config::{ServerEntry, ShardSyncConfig};
use shardsync::directory::ConfigDirectory;
use shardsync::error::Result;
use shardsync::metadata::MetadataStore;
use shardsync::network::{MetadataService, TcpTransport};
use shardsync::replication::{MetadataReplication, ReplicationConfig};

/// ShardSync - Distributed Partition-Map Metadata Replication
#[derive(Parser)]
#[command(name = "shardsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "shardsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ShardSync node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "shardsync.toml")]
        output: PathBuf,

        /// Server name
        #[arg(long, default_value = "node-1")]
        node_name: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_name } => run_init(output, node_name),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the ShardSync node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting ShardSync node...");

    // Load configuration
    let config = match ShardSyncConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for server: {}", config.node.name);

    // Ensure directories exist
    if let Err(e) = std::fs::create_dir_all(config.data_dir()) {
        tracing::error!("Failed to create data directory {:?}: {}", config.data_dir(), e);
        return Err(e.into());
    }

    // Initialize the local metadata store
    let store = match MetadataStore::new(config.store_dir(), config.node.name.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to initialize metadata store: {}", e);
            return Err(e);
        }
    };
    tracing::info!(
        "Metadata store initialized, {} table(s) held",
        store.tables_held().await?
    );

    // Initialize the config directory with this node and its peers
    let directory = Arc::new(ConfigDirectory::new());
    directory
        .add_server(config.node.name.clone(), config.advertise_address().to_string())
        .await;
    for server in &config.cluster.servers {
        if server.name == config.node.name {
            continue;
        }
        directory
            .add_server(server.name.clone(), server.address.clone())
            .await;
    }
    tracing::info!(
        "Config directory initialized with {} server(s)",
        directory.list_servers().await.len()
    );

    // Start the peer-facing metadata service
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    let service = Arc::new(MetadataService::new(Arc::clone(&store)));
    let service_handle = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = service.serve(listener).await {
                tracing::error!("Metadata service failed: {}", e);
            }
        })
    };

    // Start the replication orchestrator
    let transport = Arc::new(TcpTransport::new(
        Arc::clone(&directory),
        config.connect_timeout(),
        config.request_timeout(),
    ));

    let replication = Arc::new(MetadataReplication::new(
        Arc::clone(&directory),
        Arc::clone(&store),
        Arc::clone(&transport) as Arc<dyn shardsync::network::PeerTransport>,
        ReplicationConfig {
            num_workers: config.replication.num_workers,
            retry_delay: config.retry_delay(),
        },
    ));
    Arc::clone(&replication).start().await?;

    tracing::info!("ShardSync node {} is running", config.node.name);

    // Run until interrupted
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received shutdown signal");

    // Orderly shutdown: stop deriving and pushing first, then close the
    // peer-facing service and pooled connections
    replication.stop().await;
    service.stop();
    let _ = service_handle.await;
    transport.close().await;

    tracing::info!("ShardSync shutdown complete");
    Ok(())
}

/// Write a starter configuration file
fn run_init(output: PathBuf, node_name: String) -> Result<()> {
    if output.exists() {
        return Err(shardsync::Error::Config(format!(
            "{:?} already exists, refusing to overwrite",
            output
        )));
    }

    let config = ShardSyncConfig {
        node: shardsync::config::NodeConfig {
            name: node_name,
            bind_address: "0.0.0.0:7654".to_string(),
            data_dir: PathBuf::from("/var/lib/shardsync"),
            advertise_address: None,
        },
        cluster: shardsync::config::ClusterConfig {
            servers: vec![ServerEntry {
                name: "node-2".to_string(),
                address: "10.0.0.2:7654".to_string(),
            }],
        },
        replication: Default::default(),
        logging: Default::default(),
    };

    let content = toml::to_string_pretty(&config)
        .map_err(|e| shardsync::Error::Config(format!("failed to render config: {}", e)))?;
    std::fs::write(&output, content)?;

    println!("Wrote configuration to {:?}", output);
    println!("Edit node.name, node.bind_address and cluster.servers before starting.");
    Ok(())
}

/// Validate a configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match ShardSyncConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration {:?} is valid", config_path);
            println!("  server name: {}", config.node.name);
            println!("  bind address: {}", config.node.bind_address);
            println!("  cluster servers: {}", config.cluster.servers.len());
            println!("  replication workers: {}", config.replication.num_workers);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration {:?} is invalid: {}", config_path, e);
            Err(e)
        }
    }
}
