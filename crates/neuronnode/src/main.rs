use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use neuronnode::{Config, Node};

#[derive(Parser, Debug)]
#[command(name = "neuronnode", about = "NetworkNeuron relay node", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (keys, ledger journal)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Create a default configuration and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init {
        let config = Config::create_default(cli.config, cli.data_dir)?;
        println!("Configuration written to {}", config.config_path().display());
        println!("Data directory: {}", config.data_directory.display());
        return Ok(());
    }

    let config = Config::load(cli.config, cli.data_dir)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("NeuronNode starting");
    let mut node = Node::new(config).await?;
    node.run().await
}
