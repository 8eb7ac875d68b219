//! Async exception delivery latency
//!
//! A guarded thread spins through checkpoints while the main thread raises
//! async exceptions at it. Each delivery unwinds the spin loop; the thread
//! reports how long the exception waited in its slot, clears its error and
//! starts spinning again.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use yieldpoint_runtime::{
    checkpoint, Builder, Checkpoint, ExceptionValue, HostVersion, LocalHost, LocalHostConfig,
    Propagate, ThreadContext,
};

/// Async exception latency benchmark
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of exceptions to deliver
    #[arg(short, long, default_value_t = 1_000)]
    rounds: u32,

    /// Use the counter strategy instead of flags
    #[arg(long)]
    legacy: bool,

    /// Check interval (counter strategy)
    #[arg(long, default_value_t = 20)]
    check_interval: u32,

    /// Work units between checkpoints
    #[arg(long, default_value_t = 1_000)]
    work: u64,
}

fn spin(cp: &Checkpoint<Arc<LocalHost>>, t: &ThreadContext, work: u64) -> Result<(), Propagate> {
    let mut sum: u64 = 0;
    loop {
        for j in 0..work {
            sum = sum.wrapping_add(j);
            std::hint::black_box(sum);
        }
        checkpoint!(cp, t);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let version = if args.legacy {
        HostVersion::new(2, 7)
    } else {
        HostVersion::new(3, 12)
    };
    let host = Arc::new(LocalHost::new(LocalHostConfig {
        version,
        ..LocalHostConfig::default()
    }));
    let cp = Builder::new()
        .host_version(version)
        .check_interval(args.check_interval)
        .build(host.clone())
        .context("failed to build checkpoint")?;

    info!("Interrupt latency benchmark");
    info!("  {} rounds, {:?} strategy", args.rounds, cp.strategy().kind());

    let (id_tx, id_rx) = mpsc::channel();
    let (caught_tx, caught_rx) = mpsc::channel::<Instant>();
    let rounds = args.rounds;
    let work = args.work;

    let worker = {
        let host = host.clone();
        thread::Builder::new()
            .name("target".to_string())
            .spawn(move || -> Result<()> {
                let t = host.attach(Some("target"));
                id_tx.send(t.id())?;

                for _ in 0..rounds {
                    match spin(&cp, &t, work) {
                        Err(Propagate::AsyncException(exc)) => {
                            debug!("caught {}", exc);
                            t.take_error();
                            caught_tx.send(Instant::now())?;
                        }
                        Err(e) => return Err(anyhow!("unexpected unwind: {}", e)),
                        Ok(()) => unreachable!("spin only returns by unwinding"),
                    }
                }

                host.detach(t)?;
                Ok(())
            })
            .context("failed to spawn target thread")?
    };

    let target = id_rx.recv().context("target thread exited early")?;
    let mut latencies = Vec::with_capacity(rounds as usize);

    for round in 0..rounds {
        let raised = Instant::now();
        host.raise_async_exc(
            target,
            ExceptionValue::new("KeyboardInterrupt", format!("round {}", round)),
        )?;

        let caught = caught_rx
            .recv_timeout(Duration::from_secs(10))
            .context("exception was never delivered")?;
        latencies.push(caught.saturating_duration_since(raised));
    }

    worker
        .join()
        .map_err(|_| anyhow!("target thread panicked"))??;

    latencies.sort_unstable();
    info!("=== Results ===");
    info!("Delivered: {}", latencies.len());
    if !latencies.is_empty() {
        info!("Latency p50: {:?}", latencies[latencies.len() / 2]);
        info!("Latency p99: {:?}", latencies[latencies.len() * 99 / 100]);
        info!("Latency max: {:?}", latencies[latencies.len() - 1]);
    }

    Ok(())
}
