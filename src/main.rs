//! Pendulum node entry point
//!
//! Loads the shared row settings, then serves this node's control and
//! observer surface over TCP.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info pendulum-node --config row.json --index 2
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use pendulum_row::transport::tcp::{self, TcpControlClient, TcpPositionFeed};
use pendulum_row::{Node, NodeSettings};

/// Run one pendulum node of a row
#[derive(Parser)]
#[command(name = "pendulum-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Row settings file (JSON), shared by every node
    #[arg(short, long)]
    config: PathBuf,

    /// This node's place in the row (overrides the file)
    #[arg(short, long)]
    index: Option<usize>,

    /// Listen address (defaults to this node's entry in `addresses`)
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = NodeSettings::load(&cli.config)?;
    if let Some(index) = cli.index {
        settings.index = index;
    }
    settings.validate()?;

    let listen = match cli.listen {
        Some(listen) => listen,
        None => settings.own_address().unwrap_or_default().to_owned(),
    };
    log::info!("Pendulum node {} starting...", settings.index);

    let node = Node::new(
        settings,
        Arc::new(TcpControlClient::default()),
        Arc::new(TcpPositionFeed),
    )?;
    let listener = TcpListener::bind(&listen).await?;

    tokio::select! {
        result = tcp::serve(listener, node) => result?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }
    Ok(())
}
