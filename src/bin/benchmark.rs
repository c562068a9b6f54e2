//! Load generator for a distkv server
//!
//! Measures PUT/GET latency and throughput against a running leader. With
//! `--follower` it also measures how long a PUT takes to become readable on
//! that follower.

use clap::Parser;
use distkv::Client;
use std::time::{Duration, Instant};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(author, version, about = "distkv benchmark", long_about = None)]
struct Args {
    /// Leader to write to
    #[arg(long, default_value = "127.0.0.1:3108")]
    server: String,

    /// Follower of `server` to measure replication lag against
    #[arg(long)]
    follower: Option<String>,

    /// Operations per sequential run
    #[arg(long, default_value_t = 2000)]
    ops: usize,

    /// Concurrent client counts to run, comma-separated
    #[arg(long, value_delimiter = ',', default_value = "10,50")]
    clients: Vec<usize>,

    /// Writes sampled for replication lag
    #[arg(long, default_value_t = 50)]
    lag_samples: usize,
}

/// Print throughput and latency percentiles for one run
fn report(name: &str, elapsed: Duration, samples: &mut [Duration]) {
    if samples.is_empty() {
        println!("{:<28} no samples", name);
        return;
    }
    samples.sort_unstable();

    let ms = |p: f64| percentile(samples, p).as_secs_f64() * 1000.0;
    println!(
        "{:<28} {:>7} ops {:>10.0} ops/s   p50 {:>7.3}ms   p99 {:>7.3}ms   max {:>7.3}ms",
        name,
        samples.len(),
        samples.len() as f64 / elapsed.as_secs_f64(),
        ms(0.50),
        ms(0.99),
        ms(1.0),
    );
}

/// Nearest-rank percentile of already sorted samples
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let index = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[index]
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    println!("distkv benchmark against {}", args.server);

    let keys: Vec<String> = (0..args.ops).map(|i| format!("bench_key_{}", i)).collect();

    let mut client = Client::connect(&args.server).await?;
    let mut samples = Vec::with_capacity(keys.len());
    let start = Instant::now();
    for key in &keys {
        let op_start = Instant::now();
        client.put(key.as_bytes(), b"bench_value").await?;
        samples.push(op_start.elapsed());
    }
    report("PUT", start.elapsed(), &mut samples);

    samples.clear();
    let start = Instant::now();
    for key in &keys {
        let op_start = Instant::now();
        client.get(key.as_bytes()).await?;
        samples.push(op_start.elapsed());
    }
    report("GET", start.elapsed(), &mut samples);
    client.close().await?;

    for &num_clients in &args.clients {
        let (elapsed, mut samples) =
            concurrent_puts(&args.server, num_clients, args.ops / 10).await?;
        report(&format!("PUT x{} clients", num_clients), elapsed, &mut samples);
    }

    if let Some(follower) = &args.follower {
        let (elapsed, mut samples) =
            replication_lag(&args.server, follower, args.lag_samples).await?;
        report("replication lag", elapsed, &mut samples);
    }

    Ok(())
}

async fn concurrent_puts(
    server: &str,
    num_clients: usize,
    ops_per_client: usize,
) -> Result<(Duration, Vec<Duration>), BoxError> {
    let start = Instant::now();
    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let server = server.to_string();
            tokio::spawn(async move {
                let mut client = Client::connect(&server).await?;
                let mut samples = Vec::with_capacity(ops_per_client);
                for i in 0..ops_per_client {
                    let key = format!("concurrent_key_{}_{}", client_id, i);
                    let op_start = Instant::now();
                    client.put(key.as_bytes(), b"bench_value").await?;
                    samples.push(op_start.elapsed());
                }
                client.close().await?;
                Ok::<_, distkv::DistKvError>(samples)
            })
        })
        .collect();

    let mut samples = Vec::new();
    for handle in handles {
        samples.extend(handle.await??);
    }
    Ok((start.elapsed(), samples))
}

/// Time from a PUT on the leader until the follower serves the new value
async fn replication_lag(
    leader: &str,
    follower: &str,
    writes: usize,
) -> Result<(Duration, Vec<Duration>), BoxError> {
    let mut leader = Client::connect(leader).await?;
    let mut follower = Client::connect(follower).await?;
    let mut samples = Vec::with_capacity(writes);

    let start = Instant::now();
    for i in 0..writes {
        let value = format!("lag_{}", i);
        let put_start = Instant::now();
        leader.put(b"bench_lag_key", value.as_bytes()).await?;

        let deadline = put_start + Duration::from_secs(5);
        loop {
            if follower.get(b"bench_lag_key").await.ok().as_deref() == Some(value.as_bytes()) {
                samples.push(put_start.elapsed());
                break;
            }
            if Instant::now() > deadline {
                eprintln!("write {} never reached the follower", i);
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    leader.close().await?;
    follower.close().await?;
    Ok((start.elapsed(), samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();

        assert_eq!(percentile(&samples, 0.0), Duration::from_millis(1));
        assert_eq!(percentile(&samples, 0.5), Duration::from_millis(51));
        assert_eq!(percentile(&samples, 0.99), Duration::from_millis(99));
        assert_eq!(percentile(&samples, 1.0), Duration::from_millis(100));
        assert_eq!(percentile(&[], 0.99), Duration::ZERO);

        let single = [Duration::from_micros(7)];
        assert_eq!(percentile(&single, 0.5), single[0]);
    }
}
