//! replicad - Node-local Replica Configurator for DRBD
//!
//! Seeds the replicas declared in the agent configuration and keeps them
//! consistent until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replicad::config::AgentConfig;
use replicad::configurator::{Configurator, ReplicaConfigurator};
use replicad::engine::DrbdEngine;
use replicad::error::Result;

/// replicad - Node-local Replica Configurator for DRBD
#[derive(Parser)]
#[command(name = "replicad")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "replicad.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node agent
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "replicad.toml")]
        output: PathBuf,

        /// Node name
        #[arg(long, default_value = "node1")]
        node_name: String,

        /// Replication address of this node
        #[arg(long, default_value = "10.0.0.1")]
        address: String,
    },

    /// Validate configuration file
    Validate,

    /// Show the HA state of the configured replicas
    Status {
        /// Only show this replica
        #[arg(short, long)]
        replica: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| AgentConfig::from_file(&cli.config).ok().map(|c| c.logging.level))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init {
            output,
            node_name,
            address,
        } => run_init(output, node_name, address),
        Commands::Validate => run_validate(cli.config),
        Commands::Status { replica } => run_status(cli.config, replica).await,
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

/// Start the node agent
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting replicad...");

    let config = match AgentConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {}", config.node.name);

    if !nix::unistd::Uid::effective().is_root() {
        tracing::warn!("Not running as root, engine commands will likely fail");
    }

    let configurator = Arc::new(ReplicaConfigurator::from_config(
        &config,
        DrbdEngine::from_config(&config),
    ));

    // Seed the declared replicas; failures are left to the reconciliation loop
    for manifest in &config.replicas {
        let replica = &manifest.descriptor;
        match configurator.apply_config(replica, &manifest.volume).await {
            Ok(()) => tracing::info!("Replica {} is configured", replica.name),
            Err(e) => {
                tracing::error!("Failed to configure replica {}: {}", replica.name, e);
                configurator
                    .register(replica.clone(), Some(manifest.volume.clone()))
                    .await;
            }
        }
    }

    if !config.reconcile.enabled {
        tracing::info!("Reconciliation disabled, exiting after seeding");
        return Ok(());
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let loop_configurator = Arc::clone(&configurator);
    let reconcile_handle = tokio::spawn(async move {
        loop_configurator.run(stop_rx).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Received shutdown signal");

    let _ = stop_tx.send(true);
    if let Err(e) = reconcile_handle.await {
        tracing::error!("Reconciliation task failed: {}", e);
    }

    tracing::info!("replicad shutdown complete");
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_name: String, address: String) -> Result<()> {
    let config_content = format!(
        r#"# replicad Configuration
# Generated configuration file

[node]
name = "{node_name}"
replication_address = "{address}"

[engine]
config_dir = "/etc/drbd.d"
drbdadm = "drbdadm"
drbdsetup = "drbdsetup"
command_timeout_secs = 30
port_base = 43001
minor_base = 1000
device_root = "/dev"
max_peers = 7

[reconcile]
enabled = true
interval_secs = 60
concurrency = 4

[logging]
level = "info"

# [[replicas]]
# name = "pvc-1-{node_name}"
# volume_name = "pvc-1"
# storage_pool_name = "pool1"
# node_name = "{node_name}"
# required_capacity_bytes = 1073741824
#
# [replicas.volume]
# volume_name = "pvc-1"
# required_capacity_bytes = 1073741824
# resource_id = 1
#
# [[replicas.volume.replicas]]
# id = 0
# hostname = "{node_name}"
# ip = "{address}"
# primary = true
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nAdd the replicas this node hosts under [[replicas]].");
    println!("Then start with: replicad --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match AgentConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node: {} ({})", config.node.name, config.node.replication_address);
            println!("  Config Directory: {}", config.engine.config_dir.display());
            println!(
                "  Reconcile: {} (every {}s)",
                if config.reconcile.enabled { "enabled" } else { "disabled" },
                config.reconcile.interval_secs
            );
            println!("  Replicas: {}", config.replicas.len());
            for manifest in &config.replicas {
                println!(
                    "    {} -> {} ({} bytes, {} peers)",
                    manifest.descriptor.name,
                    manifest.volume.volume_name,
                    manifest.volume.required_capacity_bytes,
                    manifest.volume.replicas.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show the HA state of the configured replicas
async fn run_status(config_path: PathBuf, only: Option<String>) -> Result<()> {
    let config = AgentConfig::from_file(&config_path)?;
    let configurator = ReplicaConfigurator::from_config(&config, DrbdEngine::from_config(&config));

    let selected: Vec<_> = config
        .replicas
        .iter()
        .map(|m| &m.descriptor)
        .filter(|r| only.as_deref().map_or(true, |name| r.name == name))
        .collect();

    if selected.is_empty() {
        println!("No matching replicas configured");
        return Ok(());
    }

    for replica in selected {
        match configurator.get_replica_ha_state(replica).await {
            Ok(state) => {
                println!(
                    "{:<24} {:<10} {:<13} {:<13} {}",
                    state.resource,
                    state.role.to_string(),
                    state.connection.to_string(),
                    state.data.to_string(),
                    state.disk_state
                );
                for peer in &state.peers {
                    println!(
                        "  peer {} ({}) {} {} {} out-of-sync: {} KiB",
                        peer.name,
                        peer.node_id,
                        peer.role,
                        peer.connection,
                        peer.disk_state,
                        peer.out_of_sync_kib
                    );
                }
            }
            Err(e) => println!("{:<24} {}", replica.name, e),
        }
    }

    Ok(())
}
