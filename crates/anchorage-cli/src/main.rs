//! Anchorage CLI
//!
//! Command-line interface for running an Anchorage devnet node and querying
//! its anchor listings.

use anchorage_crypto::ValidatorKey;
use anchorage_node::config::LoggingSettings;
use anchorage_node::{AnchorageNode, NodeConfig};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "anchorage")]
#[command(author = "Anchorage Developers")]
#[command(version = "0.1.0")]
#[command(about = "Anchorage - anchor-based finality for a masternode chain", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a devnet node
    Node {
        /// Configuration file path
        #[arg(short, long, default_value = "anchorage.toml")]
        config: PathBuf,

        /// Data directory
        #[arg(short, long, default_value = "~/.anchorage")]
        data_dir: PathBuf,
    },

    /// Generate a validator key
    Keygen {
        /// Output directory for keys
        #[arg(short, long, default_value = "~/.anchorage/keys")]
        output: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        #[arg(short, long, default_value = "anchorage.toml")]
        output: PathBuf,
    },

    /// Query a running node
    Query {
        #[command(subcommand)]
        query: QueryCommands,

        /// Node JSON-RPC endpoint
        #[arg(long, global = true, env = "ANCHORAGE_RPC", default_value = "http://127.0.0.1:9933")]
        rpc: String,
    },

    /// Version information
    Version,
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Anchor chain with confirmations
    Anchors,
    /// Anchors waiting for an external confirmation
    Pending,
    /// Active anchors without a mined reward
    Unrewarded,
    /// Rewarded anchors
    Rewards,
    /// Anchor auths grouped by block
    Auths,
    /// Reward confirmations grouped by anchor
    Confirms,
    /// Auth and confirm teams
    Teams {
        /// Local height, tip by default
        height: Option<u64>,
    },
    /// Community account balances
    Balances,
    /// Local tip height
    Blockcount,
}

impl QueryCommands {
    /// JSON-RPC method and params for this query
    fn request(&self) -> (&'static str, Value) {
        match self {
            QueryCommands::Anchors => ("spv_listanchors", json!([])),
            QueryCommands::Pending => ("spv_listanchorspending", json!([])),
            QueryCommands::Unrewarded => ("spv_listanchorsunrewarded", json!([])),
            QueryCommands::Rewards => ("listanchors", json!([])),
            QueryCommands::Auths => ("spv_listanchorauths", json!([])),
            QueryCommands::Confirms => ("spv_listanchorrewardconfirms", json!([])),
            QueryCommands::Teams { height: Some(h) } => ("getanchorteams", json!([h])),
            QueryCommands::Teams { height: None } => ("getanchorteams", json!([])),
            QueryCommands::Balances => ("listcommunitybalances", json!([])),
            QueryCommands::Blockcount => ("getblockcount", json!([])),
        }
    }
}

fn init_logging(settings: &LoggingSettings, verbose: bool) {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if settings.format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_ansi(settings.color),
            )
            .init();
    }
}

fn expand_path(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

async fn rpc_call(url: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });
    let response: Value = reqwest::Client::new()
        .post(url)
        .json(&request)
        .send()
        .await?
        .json()
        .await?;

    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        anyhow::bail!(
            "{} failed ({}): {}",
            method,
            error["code"],
            error["message"].as_str().unwrap_or("unknown error")
        );
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Node { config, data_dir } => {
            let config_path = expand_path(&config);
            let data_dir = expand_path(&data_dir);

            let node_config = NodeConfig::load(&config_path)?;
            init_logging(&node_config.logging, cli.verbose);

            tracing::info!("Config: {:?}", config_path);
            tracing::info!("Data: {:?}", data_dir);

            let node = AnchorageNode::new(node_config, data_dir).await?;
            node.run().await?;
        }

        Commands::Keygen { output } => {
            init_logging(&LoggingSettings::default(), cli.verbose);
            let output_dir = expand_path(&output);
            std::fs::create_dir_all(&output_dir)?;

            tracing::info!("Generating Ed25519 validator key...");
            let key = ValidatorKey::generate();

            let secret_path = output_dir.join("validator.key");
            let public_path = output_dir.join("validator.pub");
            let id_path = output_dir.join("validator.id");

            std::fs::write(&secret_path, key.secret().to_hex())?;
            std::fs::write(&public_path, hex::encode(key.public_key()))?;
            std::fs::write(&id_path, key.id().to_hex())?;

            println!("Validator key generated successfully!");
            println!("Validator ID: {}", key.id());
            println!("Secret key: {:?}", secret_path);
            println!("Public key: {:?}", public_path);
        }

        Commands::InitConfig { output } => {
            let output_path = expand_path(&output);
            if output_path.exists() {
                anyhow::bail!("{:?} already exists", output_path);
            }
            std::fs::write(&output_path, NodeConfig::default().to_toml()?)?;
            println!("Default configuration written to {:?}", output_path);
        }

        Commands::Query { query, rpc } => {
            let (method, params) = query.request();
            let result = rpc_call(&rpc, method, params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Version => {
            println!("Anchorage v{}", env!("CARGO_PKG_VERSION"));
            println!("Rust: {}", rustc_version_runtime::version());
            println!("");
            println!("Features:");
            println!("  - Anchor teams drawn from recent minters");
            println!("  - Ed25519 anchor auths and reward confirmations");
            println!("  - Anchor chain with external confirmation tracking");
            println!("  - Community-funded anchor rewards");
        }
    }

    Ok(())
}
