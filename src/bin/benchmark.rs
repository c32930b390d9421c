//! Latency and throughput measurements against a running CheckVault server
//!
//! Every operation opens its own connection, as the client library does, so
//! the numbers include connection setup.

use checkvault::Client;
use clap::Parser;
use std::time::{Duration, Instant};

type BenchResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(about = "CheckVault benchmark")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    /// Operations per single-client run
    #[arg(short, long, default_value_t = 2000)]
    operations: usize,

    /// Pipelines committing concurrently
    #[arg(short, long, default_value_t = 50)]
    clients: usize,
}

#[derive(Debug)]
struct BenchmarkResults {
    operation: String,
    total_operations: usize,
    duration: Duration,
    ops_per_second: f64,
    avg_latency_ms: f64,
    p95_latency_ms: f64,
    p99_latency_ms: f64,
}

impl BenchmarkResults {
    fn new(operation: &str, duration: Duration, latencies: &mut [Duration]) -> Self {
        latencies.sort();
        let total_operations = latencies.len();

        let ops_per_second = total_operations as f64 / duration.as_secs_f64();
        let avg_latency_ms = latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>()
            / total_operations.max(1) as f64;

        let percentile = |p: f64| {
            let index = (total_operations as f64 * p) as usize;
            latencies.get(index).unwrap_or(&Duration::ZERO).as_secs_f64() * 1000.0
        };

        Self {
            operation: operation.to_string(),
            total_operations,
            duration,
            ops_per_second,
            avg_latency_ms,
            p95_latency_ms: percentile(0.95),
            p99_latency_ms: percentile(0.99),
        }
    }

    fn print(&self) {
        println!("=== {} ===", self.operation);
        println!("Total operations: {}", self.total_operations);
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
        println!("Average latency: {:.2}ms", self.avg_latency_ms);
        println!("P95 latency: {:.2}ms", self.p95_latency_ms);
        println!("P99 latency: {:.2}ms", self.p99_latency_ms);
        println!();
    }
}

#[tokio::main]
async fn main() -> BenchResult<()> {
    let args = Args::parse();
    let client = Client::new(args.server.clone());

    println!("CheckVault benchmark against {}", args.server);
    println!("Waiting for server to be ready...");
    while client.get_checkpoint("benchmark_ready").await.is_err() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!();

    benchmark_sets(&client, args.operations).await?.print();
    benchmark_gets(&client, args.operations).await?.print();
    benchmark_commit_cycle(&client, args.operations).await?.print();
    benchmark_concurrent_pipelines(&client, args.clients, args.operations / 10)
        .await?
        .print();
    benchmark_compaction(&client).await?.print();

    Ok(())
}

async fn benchmark_sets(client: &Client, operations: usize) -> BenchResult<BenchmarkResults> {
    let mut latencies = Vec::with_capacity(operations);
    let start = Instant::now();

    for i in 0..operations {
        let pipeline = format!("bench_pipeline_{}", i % 100);
        let op_start = Instant::now();
        client.set_checkpoint(&pipeline, &i.to_string(), None).await?;
        latencies.push(op_start.elapsed());
    }

    Ok(BenchmarkResults::new("SET_CHECKPOINT", start.elapsed(), &mut latencies))
}

async fn benchmark_gets(client: &Client, operations: usize) -> BenchResult<BenchmarkResults> {
    let mut latencies = Vec::with_capacity(operations);
    let start = Instant::now();

    for i in 0..operations {
        let pipeline = format!("bench_pipeline_{}", i % 100);
        let op_start = Instant::now();
        client.get_checkpoint(&pipeline).await?;
        latencies.push(op_start.elapsed());
    }

    Ok(BenchmarkResults::new("GET_CHECKPOINT", start.elapsed(), &mut latencies))
}

/// Read the checkpoint, then commit the next position, like a pipeline run.
async fn benchmark_commit_cycle(client: &Client, operations: usize) -> BenchResult<BenchmarkResults> {
    let mut latencies = Vec::with_capacity(operations);
    let start = Instant::now();

    for _ in 0..operations {
        let op_start = Instant::now();
        let current = client
            .get_checkpoint("bench_cycle")
            .await?
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        client
            .set_checkpoint("bench_cycle", &(current + 1).to_string(), None)
            .await?;
        latencies.push(op_start.elapsed());
    }

    Ok(BenchmarkResults::new("Commit cycle (GET + SET)", start.elapsed(), &mut latencies))
}

async fn benchmark_concurrent_pipelines(
    client: &Client,
    pipelines: usize,
    commits_per_pipeline: usize,
) -> BenchResult<BenchmarkResults> {
    let start = Instant::now();
    let mut handles = Vec::with_capacity(pipelines);

    for id in 0..pipelines {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let pipeline = format!("concurrent_pipeline_{}", id);
            let mut latencies = Vec::with_capacity(commits_per_pipeline);
            for position in 0..commits_per_pipeline {
                let op_start = Instant::now();
                client
                    .set_checkpoint(&pipeline, &position.to_string(), None)
                    .await?;
                latencies.push(op_start.elapsed());
            }
            Ok::<_, checkvault::CheckVaultError>(latencies)
        }));
    }

    let mut all_latencies = Vec::new();
    for handle in handles {
        all_latencies.extend(handle.await??);
    }

    Ok(BenchmarkResults::new(
        &format!("Concurrent ({} pipelines)", pipelines),
        start.elapsed(),
        &mut all_latencies,
    ))
}

async fn benchmark_compaction(client: &Client) -> BenchResult<BenchmarkResults> {
    let mut latencies = Vec::with_capacity(10);
    let start = Instant::now();

    for _ in 0..10 {
        let op_start = Instant::now();
        client.compact().await?;
        latencies.push(op_start.elapsed());
    }

    Ok(BenchmarkResults::new("COMPACT", start.elapsed(), &mut latencies))
}
