//! CheckVault Server Binary
//!
//! Main entry point for the CheckVault TCP server

use checkvault::{CheckpointServer, Result, ServerConfig};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Durable checkpoint store for data pipelines")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,

    /// Path of the append-only file
    #[arg(long)]
    aof: Option<PathBuf>,

    /// Clients served at once; further clients are turned away
    #[arg(long)]
    max_connections: Option<usize>,

    /// Longest accepted command line in bytes
    #[arg(long)]
    max_line_length: Option<usize>,

    /// Milliseconds a client may leave responses unread before it is dropped
    #[arg(long)]
    write_timeout_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(aof) = self.aof {
            config.aof_path = aof;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(max_line_length) = self.max_line_length {
            config.max_line_length = max_line_length;
        }
        if let Some(write_timeout_ms) = self.write_timeout_ms {
            config.write_timeout_ms = write_timeout_ms;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let config = Args::parse().into_config()?;
    info!(?config, "starting CheckVault");

    let server = CheckpointServer::bind(config).await?;

    // Setup graceful shutdown on SIGINT (Ctrl+C)
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        info!("received Ctrl+C, initiating graceful shutdown");
        if let Err(e) = shutdown.shutdown() {
            error!(error = %e, "failed to initiate shutdown");
        }
    });

    server.run().await
}
