//! Integration tests for Yieldpoint runtime
//!
//! These tests drive both strategies against the in-process reference host
//! with real threads contending for the execution lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use yieldpoint_runtime::{
    Builder, Checkpoint, ExceptionValue, FlagLayout, HostVersion, LocalHost, LocalHostConfig,
    Propagate, StrategyKind,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn local_host(version: HostVersion) -> Arc<LocalHost> {
    Arc::new(LocalHost::new(LocalHostConfig {
        version,
        switch_interval: Duration::from_millis(1),
    }))
}

/// Run `threads` workers that each spin through checkpoints until stopped,
/// verifying mutual exclusion on every iteration. Returns per-worker
/// iteration counts.
fn run_contention(version: HostVersion, threads: usize) -> (Vec<u64>, Arc<LocalHost>) {
    let host = local_host(version);
    let cp = Arc::new(Builder::new().host_version(version).build(host.clone()).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let inside = Arc::new(AtomicBool::new(false));
    let progress: Arc<Vec<AtomicU64>> = Arc::new((0..threads).map(|_| AtomicU64::new(0)).collect());

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let host = host.clone();
            let cp = cp.clone();
            let stop = stop.clone();
            let inside = inside.clone();
            let progress = progress.clone();

            thread::Builder::new()
                .name(format!("guarded-{}", i))
                .spawn(move || {
                    let t = host.attach(Some(&format!("guarded-{}", i)));

                    while !stop.load(Ordering::Relaxed) {
                        assert!(host.lock().held_by(t.id()), "lost the lock");
                        assert!(!inside.swap(true, Ordering::AcqRel), "two threads inside");
                        progress[i].fetch_add(1, Ordering::Relaxed);
                        inside.store(false, Ordering::Release);

                        cp.check(&t).unwrap();
                    }

                    host.detach(t).unwrap();
                })
                .unwrap()
        })
        .collect();

    let start = Instant::now();
    while progress.iter().any(|p| p.load(Ordering::Relaxed) < 100) {
        assert!(start.elapsed() < DEADLINE, "a guarded thread starved");
        thread::sleep(Duration::from_millis(1));
    }
    stop.store(true, Ordering::Relaxed);

    for handle in handles {
        handle.join().unwrap();
    }

    let counts = progress.iter().map(|p| p.load(Ordering::Relaxed)).collect();
    (counts, host)
}

#[test]
fn test_flag_strategy_interleaves_threads() {
    let (counts, host) = run_contention(HostVersion::new(3, 12), 3);
    assert!(counts.iter().all(|&c| c >= 100));
    assert!(host.lock().switches() >= 3);
    assert!(!host.lock().is_locked());
}

#[test]
fn test_counter_strategy_interleaves_threads() {
    let (counts, host) = run_contention(HostVersion::new(2, 7), 2);
    assert!(counts.iter().all(|&c| c >= 100));
    assert!(host.lock().switches() >= 2);
}

#[test]
fn test_folded_flag_host_interleaves_threads() {
    let (counts, _) = run_contention(HostVersion::new(3, 7), 2);
    assert!(counts.iter().all(|&c| c >= 100));
}

#[test]
fn test_free_threaded_host_interleaves_threads() {
    let (counts, _) = run_contention(HostVersion::free_threaded(3, 9), 2);
    assert!(counts.iter().all(|&c| c >= 100));
}

/// Spin through checkpoints until one fails or the deadline passes
fn spin_until_interrupted(
    cp: &Checkpoint<Arc<LocalHost>>,
    t: &yieldpoint_runtime::ThreadContext,
) -> Option<Propagate> {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if let Err(e) = cp.check(t) {
            return Some(e);
        }
        std::hint::spin_loop();
    }
    None
}

#[test]
fn test_async_exception_from_other_thread() {
    for version in [HostVersion::new(2, 7), HostVersion::new(3, 12)] {
        let host = local_host(version);
        let cp = Builder::new().host_version(version).build(host.clone()).unwrap();
        let (id_tx, id_rx) = mpsc::channel();

        let worker = {
            let host = host.clone();
            thread::spawn(move || {
                let t = host.attach(Some("target"));
                id_tx.send(t.id()).unwrap();

                let outcome = spin_until_interrupted(&cp, &t);
                let active = t.error();
                host.detach(t).unwrap();
                (outcome, active)
            })
        };

        let id = id_rx.recv().unwrap();
        let exc = ExceptionValue::new("KeyboardInterrupt", "stop spinning");
        host.raise_async_exc(id, exc.clone()).unwrap();

        let (outcome, active) = worker.join().unwrap();
        assert_eq!(outcome, Some(Propagate::AsyncException(exc.clone())));
        assert_eq!(active, Some(exc));
    }
}

#[test]
fn test_pending_call_runs_on_next_checkpoint() {
    let version = HostVersion::new(3, 12);
    let host = local_host(version);
    let cp = Builder::new().host_version(version).build(host.clone()).unwrap();
    let t = host.attach(Some("main"));

    let ran = Arc::new(AtomicBool::new(false));
    let r = ran.clone();
    let h = host.clone();
    thread::spawn(move || {
        h.add_pending_call(move |_| {
            r.store(true, Ordering::Release);
            Ok(())
        });
    })
    .join()
    .unwrap();

    cp.check(&t).unwrap();
    assert!(ran.load(Ordering::Acquire));
    assert_eq!(cp.stats().dispatches.load(Ordering::Relaxed), 1);

    host.detach(t).unwrap();
}

/// On hosts that fold signals into calls-to-do, a tripped signal must still
/// reach the dispatcher on the very next checkpoint.
#[test]
fn test_signal_runs_on_next_checkpoint_with_folded_flags() {
    let version = HostVersion::new(3, 7);
    let host = local_host(version);
    let cp = Builder::new().host_version(version).build(host.clone()).unwrap();
    assert_eq!(cp.config().strategy, StrategyKind::Flag);
    assert_eq!(cp.config().flag_layout, FlagLayout::CallsOnly);
    let t = host.attach(Some("main"));

    let handled = Arc::new(AtomicBool::new(false));
    let r = handled.clone();
    let h = host.clone();
    thread::spawn(move || {
        h.trip_signal(move |_| {
            r.store(true, Ordering::Release);
            Ok(())
        });
    })
    .join()
    .unwrap();

    cp.check(&t).unwrap();
    assert!(handled.load(Ordering::Acquire), "signal handler did not run");
    assert_eq!(cp.stats().dispatches.load(Ordering::Relaxed), 1);

    // Nothing left to do
    cp.check(&t).unwrap();
    assert_eq!(cp.stats().dispatches.load(Ordering::Relaxed), 1);

    host.detach(t).unwrap();
}

#[test]
fn test_pending_call_failure_propagates_first() {
    let version = HostVersion::new(3, 12);
    let host = local_host(version);
    let cp = Builder::new().host_version(version).build(host.clone()).unwrap();
    let t = host.attach(Some("main"));

    host.add_pending_call(|_| Err(ExceptionValue::new("MemoryError", "")));
    host.lock().request_drop();
    t.async_exc_handle()
        .raise(ExceptionValue::new("SystemExit", ""))
        .unwrap();

    match cp.check(&t) {
        Err(Propagate::Dispatch(failure)) => assert_eq!(failure.reason, "MemoryError: "),
        other => panic!("expected dispatch failure, got {:?}", other),
    }

    // Neither the yield nor the exception check ran
    assert_eq!(cp.stats().yields.load(Ordering::Relaxed), 0);
    assert!(t.state().has_pending_async_exception());
    assert!(host.lock().held_by(t.id()));
    assert_eq!(t.take_error().unwrap().kind(), "MemoryError");

    // Next checkpoint picks up what was skipped
    assert!(matches!(
        cp.check(&t),
        Err(Propagate::AsyncException(ref e)) if e.kind() == "SystemExit"
    ));
    assert_eq!(cp.stats().yields.load(Ordering::Relaxed), 1);

    host.detach(t).unwrap();
}

#[test]
fn test_quiet_checkpoint_has_no_side_effects() {
    let version = HostVersion::new(3, 12);
    let host = local_host(version);
    let cp = Builder::new().host_version(version).build(host.clone()).unwrap();
    let t = host.attach(Some("main"));
    let switches = host.lock().switches();

    for _ in 0..1_000 {
        cp.check(&t).unwrap();
    }

    let stats = cp.stats();
    assert_eq!(stats.dispatches.load(Ordering::Relaxed), 0);
    assert_eq!(stats.yields.load(Ordering::Relaxed), 0);
    assert_eq!(stats.async_exceptions.load(Ordering::Relaxed), 0);
    assert_eq!(host.lock().switches(), switches);
    assert!(!t.error_occurred());

    host.detach(t).unwrap();
}
