//! End-to-end tests for ThreadPool.
//!
//! Tests cover:
//! - Round-robin assignment and end-of-stream
//! - Worker failure propagation (errors and panics)
//! - Strict and relaxed merging
//! - Lifecycle misuse (double start, restart after stop)
//! - Shutdown (stop/join, cancellation of blocked publishers)
//! - Completion predicate and diagnostics

mod common;
use common::{collect_all, identity, init_tracing, items, FailingWorker, IdentityWorker, ValueError};
use workers_pool::{
    current_worker_id, FixedListVentilator, Iterations, MergeMode, PoolError, Publisher,
    ThreadPool, ThreadPoolConfig, WorkItem,
};

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Pair = (usize, i64);

fn run_with_ventilator(config: ThreadPoolConfig, ventilator: FixedListVentilator) -> Result<Vec<Pair>> {
    let mut pool = ThreadPool::<Pair>::with_config(config)?;
    pool.start_with_ventilator(identity, (), Arc::new(ventilator))?;
    let results = collect_all(&mut pool)?;
    pool.stop();
    pool.join();
    Ok(results)
}

// ============================================================================
// 1. Distribution and End-of-Stream
// ============================================================================

#[test]
fn test_items_are_assigned_round_robin() -> Result<()> {
    init_tracing();

    let ventilator = FixedListVentilator::new(items(0..8))?;
    let config = ThreadPoolConfig::builder().workers_count(4).build();
    let mut pool = ThreadPool::<Pair>::with_config(config)?;
    pool.start_with_ventilator(identity, (), Arc::new(ventilator))?;

    let mut results = Vec::new();
    for _ in 0..8 {
        results.push(pool.get_results()?);
    }
    assert!(matches!(pool.get_results(), Err(PoolError::EmptyResults)));

    let mut by_worker: HashMap<usize, Vec<i64>> = HashMap::new();
    for (worker_id, x) in &results {
        by_worker.entry(*worker_id).or_default().push(*x);
    }
    println!("Assignment: {:?}", by_worker);
    for worker_id in 0..4 {
        let mut assigned = by_worker.remove(&worker_id).unwrap_or_default();
        assigned.sort_unstable();
        assert_eq!(assigned, vec![worker_id as i64, worker_id as i64 + 4]);
    }

    pool.stop();
    pool.join();
    Ok(())
}

#[test]
fn test_manual_ventilate_restarts_at_worker_zero() -> Result<()> {
    let mut pool = ThreadPool::<Pair>::new(3)?;
    pool.start(identity, ())?;

    pool.ventilate(items(0..2))?;
    pool.ventilate(items(2..4))?;
    let results = collect_all(&mut pool)?;

    let assignment: HashMap<i64, usize> = results.into_iter().map(|(w, x)| (x, w)).collect();
    assert_eq!(assignment[&0], 0);
    assert_eq!(assignment[&1], 1);
    assert_eq!(assignment[&2], 0);
    assert_eq!(assignment[&3], 1);

    pool.stop();
    pool.join();
    Ok(())
}

#[test]
fn test_workers_may_publish_many_results_per_item() -> Result<()> {
    let mut pool = ThreadPool::<i64>::new(2)?;
    pool.start(
        |_worker_id, publisher: Publisher<i64>, repeat: &usize| {
            let repeat = *repeat;
            Ok(move |item: &WorkItem| -> Result<()> {
                let x = item.get_i64("x")?;
                for _ in 0..repeat {
                    publisher.publish(x)?;
                }
                Ok(())
            })
        },
        3usize,
    )?;

    pool.ventilate(items(0..4))?;
    let mut results = collect_all(&mut pool)?;
    results.sort_unstable();
    assert_eq!(results, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3]);

    pool.stop();
    pool.join();
    Ok(())
}

#[test]
fn test_current_worker_id_inside_process() -> Result<()> {
    let mut pool = ThreadPool::<(Option<usize>, usize)>::new(3)?;
    pool.start(
        |_worker_id, publisher: Publisher<(Option<usize>, usize)>, _args: &()| {
            Ok(move |_item: &WorkItem| -> Result<()> {
                publisher.publish((current_worker_id(), publisher.worker_id()))?;
                Ok(())
            })
        },
        (),
    )?;

    pool.ventilate(items(0..6))?;
    for (seen, expected) in collect_all(&mut pool)? {
        assert_eq!(seen, Some(expected));
    }
    assert_eq!(current_worker_id(), None);

    pool.stop();
    pool.join();
    Ok(())
}

// ============================================================================
// 2. Worker Failures
// ============================================================================

#[test]
fn test_worker_error_is_raised_once_after_join() -> Result<()> {
    init_tracing();

    let mut pool = ThreadPool::<Pair>::new(4)?;
    pool.start(
        |_worker_id, publisher, _args: &()| Ok(FailingWorker { publisher, reject: 5 }),
        (),
    )?;
    pool.ventilate(items(0..8))?;

    let failure = loop {
        match pool.get_results() {
            Ok(result) => println!("Result before failure: {:?}", result),
            Err(e) => break e,
        }
    };

    match &failure {
        PoolError::WorkerFailed { worker_id, source } => {
            assert_eq!(*worker_id, 1);
            let value_error = source
                .downcast_ref::<ValueError>()
                .ok_or_else(|| anyhow!("expected ValueError, got {:#}", source))?;
            assert_eq!(value_error.0, 5);
        }
        other => return Err(anyhow!("expected WorkerFailed, got {}", other)),
    }

    // Already joined by get_results.
    let started = Instant::now();
    pool.join();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(pool.get_results(), Err(PoolError::EmptyResults)));
    Ok(())
}

#[test]
fn test_worker_panic_is_reported_as_failure() -> Result<()> {
    let mut pool = ThreadPool::<i64>::new(2)?;
    pool.start(
        |_worker_id, _publisher: Publisher<i64>, _args: &()| {
            Ok(|item: &WorkItem| -> Result<()> {
                if item.get_i64("x")? == 3 {
                    panic!("cannot handle 3");
                }
                Ok(())
            })
        },
        (),
    )?;
    pool.ventilate(items(0..4))?;

    match collect_all(&mut pool) {
        Err(e) => {
            let message = format!("{:#}", e);
            println!("Failure: {}", message);
            assert!(message.contains("cannot handle 3"));
        }
        Ok(results) => return Err(anyhow!("expected a failure, got {:?}", results)),
    }
    Ok(())
}

#[test]
fn test_factory_failure_fails_start() -> Result<()> {
    let mut pool = ThreadPool::<Pair>::new(3)?;
    let result = pool.start(
        |worker_id, publisher, _args: &()| {
            if worker_id == 2 {
                return Err(anyhow!("worker {} has no resources", worker_id));
            }
            identity(worker_id, publisher, &())
        },
        (),
    );

    assert!(matches!(result, Err(PoolError::WorkerSetup { worker_id: 2, .. })));
    assert!(matches!(pool.ventilate(items(0..1)), Err(PoolError::NotStarted)));
    Ok(())
}

// ============================================================================
// 3. Merge Modes
// ============================================================================

#[test]
fn test_strict_mode_with_seed_is_reproducible() -> Result<()> {
    let run = || -> Result<Vec<Pair>> {
        let ventilator = FixedListVentilator::builder(items(0..10))
            .randomize_item_order(true)
            .random_seed(42)
            .build()?;
        let config = ThreadPoolConfig::builder()
            .workers_count(4)
            .shuffle_rows(true)
            .seed(42)
            .build();
        assert_eq!(config.merge_mode(), MergeMode::Strict);
        run_with_ventilator(config, ventilator)
    };

    let first = run()?;
    let second = run()?;
    println!("Strict order: {:?}", first);

    assert_eq!(first.len(), 10);
    assert_eq!(first, second);

    // Every worker has at least two results; the first two rotations are cyclic.
    let worker_order: Vec<usize> = first.iter().take(8).map(|(w, _)| *w).collect();
    assert_eq!(worker_order, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    Ok(())
}

#[test]
fn test_relaxed_mode_delivers_same_multiset() -> Result<()> {
    let run = || -> Result<Vec<i64>> {
        let ventilator = FixedListVentilator::builder(items(0..40))
            .randomize_item_order(true)
            .iterations(Iterations::finite(2)?)
            .build()?;
        let config = ThreadPoolConfig::builder()
            .workers_count(4)
            .shuffle_rows(true)
            .build();
        assert_eq!(config.merge_mode(), MergeMode::Relaxed);

        let mut values: Vec<i64> = run_with_ventilator(config, ventilator)?
            .into_iter()
            .map(|(_, x)| x)
            .collect();
        values.sort_unstable();
        Ok(values)
    };

    let expected: Vec<i64> = (0..40).flat_map(|x| [x, x]).collect();
    assert_eq!(run()?, expected);
    assert_eq!(run()?, expected);
    Ok(())
}

// ============================================================================
// 4. Lifecycle
// ============================================================================

#[test]
fn test_start_twice_or_after_stop_is_a_usage_error() -> Result<()> {
    let mut pool = ThreadPool::<Pair>::new(2)?;
    pool.start(identity, ())?;

    let second = pool.start(identity, ());
    assert!(matches!(second, Err(PoolError::AlreadyStarted)));

    pool.stop();
    pool.join();

    let restart = pool.start(identity, ());
    match restart {
        Err(e) => {
            assert!(e.is_usage_error());
            assert!(matches!(e, PoolError::AlreadyStopped { workers_count: 2 }));
        }
        Ok(()) => return Err(anyhow!("restart after stop must fail")),
    }

    // Stopped before ever starting.
    let mut never_started = ThreadPool::<Pair>::new(1)?;
    never_started.stop();
    assert!(matches!(
        never_started.start(identity, ()),
        Err(PoolError::AlreadyStopped { .. })
    ));
    Ok(())
}

#[test]
fn test_stop_and_join_terminate_every_worker() -> Result<()> {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut pool = ThreadPool::<Pair>::new(4)?;
    pool.start(
        |_worker_id, publisher, drops: &Arc<AtomicUsize>| {
            Ok(IdentityWorker {
                publisher,
                delay: Duration::from_millis(5),
                drops: Some(Arc::clone(drops)),
            })
        },
        Arc::clone(&drops),
    )?;
    pool.ventilate(items(0..100))?;

    let _first = pool.get_results()?;
    pool.stop();
    pool.stop();
    pool.join();

    assert_eq!(drops.load(Ordering::SeqCst), 4);
    assert!(matches!(pool.get_results(), Err(PoolError::EmptyResults)));
    Ok(())
}

#[test]
fn test_stop_cancels_blocked_publishers() -> Result<()> {
    let config = ThreadPoolConfig::builder()
        .workers_count(3)
        .results_queue_size(1)
        .shared_results_queue_size(1)
        .build();
    let mut pool = ThreadPool::<i64>::with_config(config)?;
    pool.start(
        |_worker_id, publisher: Publisher<i64>, _args: &()| {
            Ok(move |item: &WorkItem| -> Result<()> {
                let x = item.get_i64("x")?;
                for _ in 0..1000 {
                    publisher.publish(x)?;
                }
                Ok(())
            })
        },
        (),
    )?;
    pool.ventilate(items(0..3))?;

    // Nobody reads: every queue fills up and every worker blocks in publish.
    std::thread::sleep(Duration::from_millis(100));
    assert!(!pool.completed());

    pool.stop();
    pool.join_timeout(Duration::from_secs(5))?;

    let stats = pool.worker_stats();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats.iter().map(|s| s.items_cancelled).sum::<usize>(), 3);
    assert!(stats.iter().all(|s| s.failures == 0));
    Ok(())
}

#[test]
fn test_drop_shuts_the_pool_down() -> Result<()> {
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let mut pool = ThreadPool::<Pair>::new(2)?;
        pool.start(
            |_worker_id, publisher, drops: &Arc<AtomicUsize>| {
                Ok(IdentityWorker {
                    publisher,
                    delay: Duration::ZERO,
                    drops: Some(Arc::clone(drops)),
                })
            },
            Arc::clone(&drops),
        )?;
        pool.ventilate(items(0..50))?;
    }
    assert_eq!(drops.load(Ordering::SeqCst), 2);
    Ok(())
}

// ============================================================================
// 5. Completion and Diagnostics
// ============================================================================

#[test]
fn test_not_completed_while_a_worker_is_busy() -> Result<()> {
    let mut pool = ThreadPool::<Pair>::new(2)?;
    pool.start(
        |_worker_id, publisher, _args: &()| {
            Ok(IdentityWorker {
                publisher,
                delay: Duration::from_millis(200),
                drops: None,
            })
        },
        (),
    )?;
    assert!(pool.completed());

    pool.ventilate(items(0..1))?;
    assert!(!pool.completed());
    std::thread::sleep(Duration::from_millis(50));
    assert!(!pool.completed(), "worker is still inside process");

    let results = collect_all(&mut pool)?;
    assert_eq!(results, vec![(0, 0)]);
    assert!(pool.completed());

    pool.stop();
    pool.join();
    Ok(())
}

#[test]
fn test_diagnostics_report_queue_depth_and_counters() -> Result<()> {
    let config = ThreadPoolConfig::builder()
        .workers_count(2)
        .shared_results_queue_size(25)
        .build();
    let mut pool = ThreadPool::<Pair>::with_config(config)?;
    pool.start(identity, ())?;
    pool.ventilate(items(0..6))?;

    // Let the merger move everything into the shared queue.
    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.results_qsize() < 12 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let diagnostics = pool.diagnostics();
    println!("Diagnostics: {:?}", diagnostics);
    assert_eq!(diagnostics.output_queue_size, 12, "6 results + 6 markers");
    assert_eq!(diagnostics.ventilated_items, 6);
    assert_eq!(diagnostics.processed_items, 0);

    let results = collect_all(&mut pool)?;
    assert_eq!(results.len(), 6);
    let diagnostics = pool.diagnostics();
    assert_eq!(diagnostics.output_queue_size, 0);
    assert_eq!(diagnostics.processed_items, 6);

    pool.stop();
    pool.join();
    Ok(())
}
