//! CLI for talking to a shardkv cluster

use clap::{Parser, Subcommand};
use shardkv::common::parse_duration;
use shardkv::coordinator::Method;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shardkv")]
#[command(about = "shardkv distributed key-value store CLI")]
#[command(version)]
struct Cli {
    /// Node to send requests to
    #[arg(long, default_value = "http://localhost:8080")]
    node: String,

    /// Request timeout (e.g. 500ms, 5s)
    #[arg(long, default_value = "5s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Quorum {
    /// Replicas that must acknowledge
    #[arg(long)]
    ack: Option<usize>,

    /// Replicas to contact
    #[arg(long)]
    from: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a value
    Get {
        key: String,

        /// Write the value to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        quorum: Quorum,
    },

    /// Write a value
    Put {
        key: String,

        /// Value (or use --file)
        value: Option<String>,

        /// Read the value from a file
        #[arg(long, conflicts_with = "value")]
        file: Option<PathBuf>,

        #[command(flatten)]
        quorum: Quorum,
    },

    /// Delete a value
    Delete {
        key: String,

        #[command(flatten)]
        quorum: Quorum,
    },

    /// Query the inspector time-series of a shard
    Inspect {
        #[arg(long)]
        shard: usize,

        /// Start time in milliseconds
        #[arg(long, default_value = "0")]
        from: i64,

        /// End time in milliseconds
        #[arg(long, default_value_t = i64::MAX)]
        to: i64,
    },

    /// Show the node's current statistics
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(parse_duration(&cli.timeout)?)
        .build()?;
    let node = cli.node.trim_end_matches('/');

    match cli.command {
        Commands::Get {
            key,
            output,
            quorum,
        } => {
            let response = entity(&client, node, Method::Get, &key, &quorum)
                .send()
                .await?;
            let status = response.status();
            let body = response.bytes().await?;
            if !status.is_success() {
                anyhow::bail!("GET {} failed: {} {}", key, status, String::from_utf8_lossy(&body));
            }
            match output {
                Some(path) => std::fs::write(path, &body)?,
                None => std::io::stdout().write_all(&body)?,
            }
        }

        Commands::Put {
            key,
            value,
            file,
            quorum,
        } => {
            let body = match (value, file) {
                (Some(value), _) => value.into_bytes(),
                (None, Some(path)) => std::fs::read(path)?,
                (None, None) => anyhow::bail!("PUT needs a value or --file"),
            };
            let response = entity(&client, node, Method::Put, &key, &quorum)
                .body(body)
                .send()
                .await?;
            report(Method::Put, &key, response).await?;
        }

        Commands::Delete { key, quorum } => {
            let response = entity(&client, node, Method::Delete, &key, &quorum)
                .send()
                .await?;
            report(Method::Delete, &key, response).await?;
        }

        Commands::Inspect { shard, from, to } => {
            let response = client
                .get(format!("{}/v0/inspector", node))
                .query(&[
                    ("shard", shard.to_string()),
                    ("from", from.to_string()),
                    ("to", to.to_string()),
                ])
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                anyhow::bail!("Inspector query failed: {} {}", status, body);
            }
            let json: serde_json::Value = serde_json::from_str(&body)?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }

        Commands::Info => {
            let body = client
                .get(format!("{}/v0/inspector/info", node))
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            let sample = shardkv::inspector::InspectorSample::decode(&body)?;
            println!("Node {}:", node);
            println!("  Time: {}", sample.time);
            println!("  Keys: {}", sample.key_count);
            println!("  Queued tasks: {}", sample.task_count);
        }
    }

    Ok(())
}

fn entity(
    client: &reqwest::Client,
    node: &str,
    method: Method,
    key: &str,
    quorum: &Quorum,
) -> reqwest::RequestBuilder {
    let mut request = client
        .request(method.into(), format!("{}/v0/entity", node))
        .query(&[("id", key)]);
    if let Some(ack) = quorum.ack {
        request = request.query(&[("ack", ack)]);
    }
    if let Some(from) = quorum.from {
        request = request.query(&[("from", from)]);
    }
    request
}

async fn report(method: Method, key: &str, response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        anyhow::bail!("{} {} failed: {} {}", method, key, status, body);
    }
    println!("{} {}: {}", method, key, status);
    Ok(())
}
