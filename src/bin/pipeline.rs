//! Demo pipeline: processes only the orders newer than its stored
//! checkpoint, then commits the newest `updated_at` it saw.

use checkvault::orders::{next_checkpoint, read_new_records};
use checkvault::{CheckVaultError, Client, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Incremental order pipeline")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    #[arg(short, long, default_value = "orders.log")]
    data: PathBuf,

    /// Pipeline name the checkpoint is stored under
    #[arg(short, long, default_value = "orders_pipeline")]
    name: String,

    /// Simulated work per record
    #[arg(long, default_value_t = 200)]
    work_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args = Args::parse();
    let client = Client::new(args.server);

    let last = client
        .get_checkpoint(&args.name)
        .await?
        .map(|value| {
            value.parse::<i64>().map_err(|_| {
                CheckVaultError::Client(format!("checkpoint {:?} is not an integer", value))
            })
        })
        .transpose()?;
    info!(pipeline = %args.name, checkpoint = ?last, "read last checkpoint");

    let records = read_new_records(&args.data, last)?;
    let Some(checkpoint) = next_checkpoint(&records) else {
        info!("no new records to process");
        return Ok(());
    };

    for record in &records {
        info!(?record, "processing order");
        tokio::time::sleep(Duration::from_millis(args.work_ms)).await;
    }

    client
        .set_checkpoint(&args.name, &checkpoint.to_string(), None)
        .await?;
    info!(processed = records.len(), checkpoint, "checkpoint updated");

    Ok(())
}
