//! Demo producer: appends a JSON order record to the data file every
//! interval until interrupted.

use checkvault::orders::{append_record, OrderRecord};
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Generate sample order records")]
struct Args {
    /// Data file the records are appended to
    #[arg(short, long, default_value = "orders.log")]
    data: PathBuf,

    #[arg(short, long, default_value_t = 2000)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> checkvault::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args = Args::parse();
    info!(data = %args.data.display(), "starting order producer, Ctrl+C to stop");

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));
    let mut order_id = 1u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let record = OrderRecord {
                    order_id,
                    updated_at: unix_now(),
                    amount: rand::thread_rng().gen_range(100..=1000),
                };
                append_record(&args.data, &record)?;
                info!(?record, "produced order");
                order_id += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                info!(produced = order_id - 1, "producer stopped");
                return Ok(());
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
