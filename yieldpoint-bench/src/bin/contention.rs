// SPDX-License-Identifier: GPL-2.0-only
// Copyright (C) 2024 Ankit Kumar Pandey <ankitkpandey1@gmail.com>

//! Lock contention benchmark
//!
//! Runs several threads through a CPU loop under the global execution lock,
//! each calling a checkpoint every iteration, and reports how evenly the
//! lock was shared.
//!
//! Expected behavior:
//! - Every thread makes progress
//! - The flag strategy hands the lock over roughly once per switch interval
//! - The counter strategy hands it over every `interval + 1` checkpoints

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use yieldpoint_runtime::{Builder, HostVersion, LocalHost, LocalHostConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Host {
    /// Legacy host, counter strategy
    Legacy,
    /// Flags with signals folded into calls-to-do
    CallsOnly,
    /// Flags with a split signal flag
    Modern,
    /// Flags with drop requests in the eval breaker
    FreeThreaded,
}

impl Host {
    fn version(self) -> HostVersion {
        match self {
            Host::Legacy => HostVersion::new(2, 7),
            Host::CallsOnly => HostVersion::new(3, 7),
            Host::Modern => HostVersion::new(3, 12),
            Host::FreeThreaded => HostVersion::free_threaded(3, 9),
        }
    }
}

/// Global-lock contention benchmark
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of guarded threads
    #[arg(short = 'n', long, default_value_t = 4)]
    threads: usize,

    /// Duration to run the benchmark (seconds)
    #[arg(short, long, default_value_t = 5)]
    duration: u64,

    /// Host runtime to emulate
    #[arg(long, value_enum, default_value_t = Host::Modern)]
    host: Host,

    /// Check interval (counter strategy)
    #[arg(long, default_value_t = 20)]
    check_interval: u32,

    /// Switch interval in microseconds
    #[arg(long, default_value_t = 5_000)]
    switch_us: u64,

    /// Work units between checkpoints
    #[arg(long, default_value_t = 1_000)]
    work: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if args.threads == 0 {
        bail!("need at least one guarded thread");
    }

    let version = args.host.version();
    let host = Arc::new(LocalHost::new(LocalHostConfig {
        version,
        switch_interval: Duration::from_micros(args.switch_us),
    }));
    let cp = Arc::new(
        Builder::new()
            .host_version(version)
            .check_interval(args.check_interval)
            .build(host.clone())
            .context("failed to build checkpoint")?,
    );

    info!("Contention benchmark");
    info!("  {} threads, {:?} host", args.threads, args.host);
    info!("  {} second duration", args.duration);

    let stop = Arc::new(AtomicBool::new(false));
    let r = stop.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt, stopping...");
        r.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let iterations: Arc<Vec<AtomicU64>> =
        Arc::new((0..args.threads).map(|_| AtomicU64::new(0)).collect());
    let wait_times: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::with_capacity(args.threads);
    for i in 0..args.threads {
        let host = host.clone();
        let cp = cp.clone();
        let stop = stop.clone();
        let iterations = iterations.clone();
        let wait_times = wait_times.clone();
        let work = args.work;

        let handle = thread::Builder::new()
            .name(format!("guarded-{}", i))
            .spawn(move || {
                let t = host.attach(Some(&format!("guarded-{}", i)));
                let mut sum: u64 = 0;
                let mut last_turn = Instant::now();

                while !stop.load(Ordering::Relaxed) {
                    for j in 0..work {
                        sum = sum.wrapping_add(j);
                        std::hint::black_box(sum);
                    }
                    iterations[i].fetch_add(1, Ordering::Relaxed);

                    let before = host.lock().switches();
                    if let Err(e) = cp.check(&t) {
                        warn!("guarded-{} unwinding: {}", i, e);
                        break;
                    }
                    if host.lock().switches() != before {
                        let now = Instant::now();
                        wait_times.lock().push(now.duration_since(last_turn));
                        last_turn = now;
                    }
                }

                if let Err(e) = host.detach(t) {
                    warn!("guarded-{} failed to detach: {}", i, e);
                }
            })
            .context("failed to spawn guarded thread")?;

        handles.push(handle);
    }

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(50));
    }
    stop.store(true, Ordering::Release);

    for handle in handles {
        if handle.join().is_err() {
            bail!("guarded thread panicked");
        }
    }

    let stats = cp.stats();
    info!("=== Results ===");
    for (i, count) in iterations.iter().enumerate() {
        info!("guarded-{}: {} iterations", i, count.load(Ordering::Relaxed));
    }
    info!("Lock switches: {}", host.lock().switches());
    info!("Yields: {}", stats.yields.load(Ordering::Relaxed));
    info!("Counter expirations: {}", stats.fired.load(Ordering::Relaxed));

    let waits = wait_times.lock();
    if !waits.is_empty() {
        let mut sorted: Vec<u64> = waits.iter().map(|d| d.as_micros() as u64).collect();
        sorted.sort_unstable();

        info!("Turn gap p50: {}µs", sorted[sorted.len() / 2]);
        info!("Turn gap p99: {}µs", sorted[sorted.len() * 99 / 100]);
        info!("Turn gap max: {}µs", sorted[sorted.len() - 1]);
    }

    if iterations.iter().any(|c| c.load(Ordering::Relaxed) == 0) {
        warn!("STARVATION DETECTED - a guarded thread never ran");
        std::process::exit(1);
    }

    info!("Benchmark complete");
    Ok(())
}
