//! Ledger node CLI
//!
//! Starts a node with its p2p listener and HTTP control plane.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use utxo_ledger::api::{create_router, ApiState};
use utxo_ledger::network::{Node, NodeConfig};
use utxo_ledger::wallet::Wallet;

#[derive(Parser)]
#[command(name = "ledger-node")]
#[command(version = "0.1.0")]
#[command(about = "A proof-of-work UTXO ledger node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node (p2p gossip + HTTP API)
    Start {
        /// Port for the HTTP API
        #[arg(long, env = "HTTP_PORT", default_value = "3001")]
        http_port: u16,

        /// Port for peer connections
        #[arg(long, env = "P2P_PORT", default_value = "6001")]
        p2p_port: u16,

        /// Initial peers to connect to (comma-separated host:port)
        #[arg(long, env = "PEERS", value_delimiter = ',')]
        peers: Vec<String>,

        /// Wallet private key file, created if missing
        #[arg(long, env = "PRIVATE_KEY", default_value = "node/wallet/private_key")]
        private_key: PathBuf,

        /// Keep mining blocks in the background
        #[arg(long)]
        mine: bool,
    },

    /// Print the wallet address, creating the key file if missing
    Address {
        /// Wallet private key file
        #[arg(long, env = "PRIVATE_KEY", default_value = "node/wallet/private_key")]
        private_key: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            http_port,
            p2p_port,
            peers,
            private_key,
            mine,
        } => {
            let config = NodeConfig {
                http_port,
                p2p_port,
                peers: peers
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                private_key_path: private_key,
                mine,
            };
            run_node(config)
        }

        Commands::Address { private_key } => {
            let wallet = Wallet::load_or_create(&private_key)?;
            println!("{}", wallet.address());
            Ok(())
        }
    }
}

fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let http_port = config.http_port;
        let node = Arc::new(Node::new(config)?);
        println!("💳 Wallet address: {}", node.wallet().address());

        let p2p_addr = node.start().await?;
        println!("🌐 P2P listening on {}", p2p_addr);

        // Ctrl+C goes through the same path as POST /stop
        let signal_node = node.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_node.shutdown();
            }
        });

        let app = create_router(ApiState { node: node.clone() });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port)).await?;
        println!("🚀 HTTP API listening on http://localhost:{}", http_port);

        let shutdown_node = node.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown_node.wait_for_shutdown().await })
            .await?;

        println!("📴 Node stopped");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
