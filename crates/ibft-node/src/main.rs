//! IBFT Node - in-process IBFT devnet.
//!
//! This is the main entry point for running a local validator network.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ibft_consensus::generate_devnet_genesis;
use ibft_node::config::NodeConfig;
use ibft_node::devnet::Devnet;
use ibft_node::observability::{init_logging, LogFormat};
use std::path::PathBuf;
use std::time::Duration;

/// IBFT Node - Byzantine fault tolerant block finality
#[derive(Parser, Debug)]
#[command(name = "ibft-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every validator of a genesis in this process
    Devnet {
        /// Number of validators when no genesis file is configured
        #[arg(long)]
        validators: Option<usize>,
        /// Genesis file (JSON or YAML)
        #[arg(long)]
        genesis: Option<PathBuf>,
        /// Stop once every validator reached this height
        #[arg(long)]
        max_height: Option<u64>,
    },

    /// Write a devnet genesis file
    Genesis {
        /// Number of validators
        #[arg(long, default_value_t = 4)]
        validators: usize,
        /// Genesis timestamp (unix seconds)
        #[arg(long, default_value_t = 0)]
        timestamp: u64,
        /// Output path; YAML when the extension is .yaml or .yml
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config =
        NodeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    init_logging(&config.log_level, LogFormat::parse(&config.log_format));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting IBFT node");

    match cli.command {
        Commands::Devnet {
            validators,
            genesis,
            max_height,
        } => {
            if let Some(validators) = validators {
                config.validators = validators;
            }
            if genesis.is_some() {
                config.genesis = genesis;
            }
            if max_height.is_some() {
                config.max_height = max_height;
            }
            run_devnet(config).await
        }
        Commands::Genesis {
            validators,
            timestamp,
            output,
        } => {
            let genesis = generate_devnet_genesis(validators, timestamp);
            let yaml = matches!(
                output.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if yaml {
                genesis.save_yaml(&output)?;
            } else {
                genesis.save_json(&output)?;
            }
            tracing::info!(path = %output.display(), validators, "genesis written");
            Ok(())
        }
    }
}

async fn run_devnet(config: NodeConfig) -> anyhow::Result<()> {
    let genesis = config.genesis().context("failed to load genesis")?;
    let local = config.node_key()?.map(|key| key.id());
    let mut devnet = Devnet::new(genesis.clone());
    for seed in 0..genesis.validators.len() as u64 {
        devnet.spawn(ibft_types::NodeKey::from_seed(seed))?;
    }
    tracing::info!(
        chain_id = %genesis.chain_id,
        validators = devnet.nodes().len(),
        "devnet running. Press Ctrl+C to stop."
    );

    let mut report = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let height = devnet.min_height();
                tracing::info!(height, "devnet progress");
                if config.max_height.is_some_and(|max| height >= max) {
                    break;
                }
                if devnet.nodes().iter().any(|n| n.is_finished()) {
                    tracing::error!("a validator stopped unexpectedly");
                    break;
                }
            }
        }
    }

    let conflicts = devnet.conflicting_heights();
    // Report the configured validator, or the first one.
    let reported = local
        .and_then(|id| devnet.node(&id))
        .or_else(|| devnet.nodes().first());
    if let Some(node) = reported {
        println!("{}", node.metrics().encode());
    }
    println!("{}", devnet.network().metrics().encode());
    devnet.shutdown().await?;
    anyhow::ensure!(conflicts.is_empty(), "validators disagree at heights {conflicts:?}");
    Ok(())
}
