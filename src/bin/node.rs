//! Node binary

use clap::{Parser, Subcommand};
use shardkv::{common::NodeConfig, Node};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-node")]
#[command(about = "shardkv storage node with quorum coordination")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Config file (TOML); SHARDKV__* environment variables override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Public URL of this node
        #[arg(long)]
        self_url: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Every node of the cluster (comma-separated)
        #[arg(long, value_delimiter = ',')]
        cluster: Vec<String>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Replica worker tasks
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            self_url,
            bind,
            cluster,
            data_dir,
            workers,
        } => {
            // File and environment first, CLI arguments have priority
            let mut node_config = NodeConfig::load(config.as_deref())?;
            if let Some(self_url) = self_url {
                node_config.self_url = self_url;
            }
            if let Some(bind) = bind {
                node_config.bind_addr = bind.parse()?;
            }
            if !cluster.is_empty() {
                node_config.cluster_urls = cluster;
            }
            if let Some(data_dir) = data_dir {
                node_config.data_dir = data_dir;
            }
            if let Some(workers) = workers {
                node_config.workers = workers;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| node_config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            node_config.validate()?;
            Node::new(node_config).serve().await?;
        }
    }

    Ok(())
}
