use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ingest_buffer::buffer::{BufferManager, RunStats};
use ingest_buffer::config::{BufferConfig, FailurePolicy};
use ingest_buffer::worker::{FnProcessor, ProcessResult, WorkerExit, WorkerSummary};
use ingest_buffer::IngestError;

/// Short idle timeout so drains finish quickly.
fn test_config(trigger_limit: usize, bite_size: usize, max_consumers: usize) -> BufferConfig {
    BufferConfig::new(trigger_limit, bite_size, max_consumers).with_idle_timeout_ms(50)
}

/// Fails on every item equal to `bad`, otherwise passes the item through.
fn failing_on(bad: u32) -> FnProcessor<impl Fn(u32, &RunStats) -> ProcessResult<u32>, u32> {
    FnProcessor::new(move |n: u32, _stats: &RunStats| -> ProcessResult<u32> {
        if n == bad {
            Err(format!("cannot process {}", n).into())
        } else {
            Ok(Some(n))
        }
    })
}

#[tokio::test]
async fn test_backlog_scales_workers_to_cap() {
    let mut buffer = BufferManager::passthrough(test_config(5000, 1000, 3)).unwrap();

    for n in 0..12_000u32 {
        buffer.submit(n).unwrap();
    }

    // Workers have not run yet on this single-threaded runtime
    assert_eq!(buffer.backlog(), 12_000);
    assert_eq!(buffer.running_workers(), 3);

    let mut results = buffer.drain().await;
    assert_eq!(results.len(), 12_000);
    assert_eq!(buffer.peak_workers(), 3);

    results.sort_unstable();
    assert!(results.iter().copied().eq(0..12_000));
}

#[tokio::test]
async fn test_small_backlog_uses_one_worker() {
    let mut buffer = BufferManager::passthrough(test_config(5000, 1000, 5)).unwrap();

    for n in 0..4_999u32 {
        buffer.submit(n).unwrap();
    }
    let results = buffer.drain().await;

    assert_eq!(results.len(), 4_999);
    assert_eq!(buffer.peak_workers(), 1);
    assert_eq!(buffer.workers_started(), 1);
}

#[tokio::test]
async fn test_worker_count_never_exceeds_cap() {
    let mut buffer = BufferManager::passthrough(test_config(100, 50, 3)).unwrap();

    for n in 0..20_000u32 {
        buffer.submit(n).unwrap();
        assert!(buffer.running_workers() <= 3);
    }
    let results = buffer.drain().await;

    assert_eq!(results.len(), 20_000);
    assert_eq!(buffer.peak_workers(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_collect_every_item() {
    let mut buffer = BufferManager::passthrough(test_config(500, 100, 4)).unwrap();

    for n in 0..50_000u32 {
        buffer.submit(n).unwrap();
        if n % 1000 == 0 {
            tokio::task::yield_now().await;
        }
    }
    let mut results = buffer.drain().await;

    assert!(buffer.peak_workers() <= 4);
    assert_eq!(results.len(), 50_000);
    results.sort_unstable();
    assert!(results.iter().copied().eq(0..50_000));

    let stats = buffer.stats();
    assert_eq!(stats.processed(), 50_000);
    assert_eq!(stats.failed(), 0);
}

#[tokio::test]
async fn test_submit_does_not_wait_on_workers() {
    let slow = FnProcessor::new(|n: u32, _stats: &RunStats| -> ProcessResult<u32> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(Some(n))
    });
    let mut buffer = BufferManager::new(test_config(5000, 1000, 2), slow).unwrap();

    let started = Instant::now();
    for n in 0..10_000u32 {
        buffer.submit(n).unwrap();
    }
    // Processing this many items would take at least ten seconds
    assert!(started.elapsed() < Duration::from_secs(2));

    // Never drained; the pending workers are dropped with the runtime
    assert_eq!(buffer.backlog(), 10_000);
}

#[tokio::test]
async fn test_processor_counts_writes() {
    let writer = FnProcessor::new(|n: u32, stats: &RunStats| -> ProcessResult<u32> {
        match n % 3 {
            0 => stats.increment_insertions(),
            1 => stats.increment_updates(),
            _ => stats.increment_deletions(),
        }
        // Deletions produce nothing to collect
        Ok((n % 3 != 2).then_some(n))
    });
    let mut buffer = BufferManager::new(test_config(5000, 10, 2), writer).unwrap();

    for n in 0..300u32 {
        buffer.submit(n).unwrap();
    }
    let results = buffer.drain().await;

    let stats = buffer.stats();
    assert_eq!(results.len(), 200);
    assert_eq!(stats.processed(), 300);
    assert_eq!(stats.adds(), 100);
    assert_eq!(stats.updates(), 100);
    assert_eq!(stats.deletes(), 100);
    assert!(stats.is_finished());
    assert!(stats.average_rate().is_ok());
}

#[tokio::test]
async fn test_isolated_failure_keeps_worker_running() {
    let mut buffer = BufferManager::new(test_config(1000, 10, 1), failing_on(5)).unwrap();

    for n in 0..20u32 {
        buffer.submit(n).unwrap();
    }
    let results = buffer.drain().await;

    assert_eq!(results.len(), 19);
    assert!(!results.contains(&5));
    assert_eq!(buffer.stats().failed(), 1);
    assert_eq!(buffer.stats().processed(), 19);
    assert_eq!(buffer.workers_started(), 1);
}

#[tokio::test]
async fn test_aborting_worker_hands_back_its_bite() {
    let config = test_config(1000, 10, 1).with_failure_policy(FailurePolicy::Abort);
    let exits = Arc::new(Mutex::new(Vec::new()));
    let mut buffer = BufferManager::new(config, failing_on(5))
        .unwrap()
        .on_consumer_complete({
            let exits = exits.clone();
            move |summary: &WorkerSummary, _partial: &[u32]| {
                exits.lock().unwrap().push(summary.exit.clone());
            }
        });

    for n in 0..20u32 {
        buffer.submit(n).unwrap();
    }
    let mut results = buffer.drain().await;

    // Item 5 is lost, the rest of its bite is picked up by a new worker
    results.sort_unstable();
    let expected: Vec<u32> = (0..20).filter(|n| *n != 5).collect();
    assert_eq!(results, expected);
    assert_eq!(buffer.stats().failed(), 1);
    assert_eq!(buffer.workers_started(), 2);

    let exits = exits.lock().unwrap();
    assert_eq!(exits.len(), 2);
    assert!(matches!(exits[0], WorkerExit::Aborted(_)));
    assert_eq!(exits[1], WorkerExit::Idle);
}

/// Panics on every item equal to `bad`, otherwise passes the item through.
fn panicking_on(bad: u32) -> FnProcessor<impl Fn(u32, &RunStats) -> ProcessResult<u32>, u32> {
    FnProcessor::new(move |n: u32, _stats: &RunStats| -> ProcessResult<u32> {
        if n == bad {
            panic!("corrupt record {}", n);
        }
        Ok(Some(n))
    })
}

#[tokio::test]
async fn test_processor_panic_is_isolated_like_a_failure() {
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let mut buffer = BufferManager::new(test_config(1000, 1000, 1), panicking_on(5))
        .unwrap()
        .on_consumer_complete({
            let hook_calls = hook_calls.clone();
            move |_summary: &WorkerSummary, _partial: &[u32]| {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            }
        });

    for n in 0..20u32 {
        buffer.submit(n).unwrap();
    }
    let mut results = buffer.drain().await;

    results.sort_unstable();
    let expected: Vec<u32> = (0..20).filter(|n| *n != 5).collect();
    assert_eq!(results, expected);
    assert_eq!(buffer.stats().processed(), 19);
    assert_eq!(buffer.stats().failed(), 1);
    assert_eq!(buffer.workers_started(), 1);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_processor_panic_under_abort_requeues_bite() {
    let config = test_config(1000, 1000, 1).with_failure_policy(FailurePolicy::Abort);
    let exits = Arc::new(Mutex::new(Vec::new()));
    let mut buffer = BufferManager::new(config, panicking_on(5))
        .unwrap()
        .on_consumer_complete({
            let exits = exits.clone();
            move |summary: &WorkerSummary, _partial: &[u32]| {
                exits.lock().unwrap().push(summary.exit.clone());
            }
        });

    for n in 0..20u32 {
        buffer.submit(n).unwrap();
    }
    let mut results = buffer.drain().await;

    // Outputs computed before the panic are kept, the rest is reprocessed
    results.sort_unstable();
    let expected: Vec<u32> = (0..20).filter(|n| *n != 5).collect();
    assert_eq!(results, expected);
    assert_eq!(buffer.stats().processed(), 19);
    assert_eq!(buffer.workers_started(), 2);

    let exits = exits.lock().unwrap();
    assert_eq!(exits.len(), 2);
    match &exits[0] {
        WorkerExit::Aborted(reason) => assert!(reason.contains("corrupt record 5")),
        other => panic!("expected an aborted worker, got {}", other),
    }
}

#[tokio::test]
async fn test_peak_ignores_exited_workers() {
    let mut buffer = BufferManager::passthrough(test_config(1, 10, 3)).unwrap();

    // Each worker goes idle and exits before the next submission
    for n in 0..3u32 {
        buffer.submit(n).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(buffer.running_workers(), 0);
    }
    let results = buffer.drain().await;

    assert_eq!(results.len(), 3);
    assert_eq!(buffer.workers_started(), 3);
    assert_eq!(buffer.peak_workers(), 1);
}

#[tokio::test]
async fn test_hooks_fire_per_worker_and_per_drain() {
    let consumer_calls = Arc::new(AtomicUsize::new(0));
    let partial_sizes = Arc::new(Mutex::new(Vec::new()));
    let drained = Arc::new(Mutex::new(Vec::new()));

    let mut buffer = BufferManager::passthrough(test_config(5000, 1000, 3))
        .unwrap()
        .on_consumer_complete({
            let consumer_calls = consumer_calls.clone();
            let partial_sizes = partial_sizes.clone();
            move |_summary: &WorkerSummary, partial: &[u32]| {
                consumer_calls.fetch_add(1, Ordering::SeqCst);
                partial_sizes.lock().unwrap().push(partial.len());
            }
        })
        .on_buffer_complete({
            let drained = drained.clone();
            move |results: &[u32]| {
                drained.lock().unwrap().push(results.len());
            }
        });

    for n in 0..12_000u32 {
        buffer.submit(n).unwrap();
    }
    let results = buffer.drain().await;

    assert_eq!(
        consumer_calls.load(Ordering::SeqCst) as u64,
        buffer.workers_started()
    );
    assert!(partial_sizes
        .lock()
        .unwrap()
        .iter()
        .all(|n| *n <= results.len()));
    assert_eq!(*drained.lock().unwrap(), vec![12_000]);
}

#[tokio::test]
async fn test_drain_with_nothing_submitted() {
    let mut buffer = BufferManager::<u32>::passthrough(test_config(10, 10, 2)).unwrap();

    let results = buffer.drain().await;

    assert!(results.is_empty());
    assert_eq!(buffer.workers_started(), 0);
    assert!(matches!(
        buffer.stats().average_rate(),
        Err(IngestError::DivisionUndefined(_))
    ));
}

#[tokio::test]
async fn test_submit_after_drain_starts_new_run() {
    let mut buffer = BufferManager::passthrough(test_config(5000, 100, 2)).unwrap();

    for n in 0..500u32 {
        buffer.submit(n).unwrap();
    }
    let first_run = buffer.run_id();
    let first = buffer.drain().await;
    let first_stats = buffer.stats();

    for n in 0..200u32 {
        buffer.submit(n).unwrap();
    }
    let second = buffer.drain().await;

    assert_eq!(first.len(), 500);
    assert_eq!(second.len(), 200);
    assert_ne!(buffer.run_id(), first_run);
    assert_eq!(first_stats.processed(), 500);
    assert_eq!(buffer.stats().processed(), 200);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result: Result<BufferManager<u32>, _> =
        BufferManager::passthrough(BufferConfig::new(5000, 0, 3));
    assert!(matches!(result, Err(IngestError::Config(_))));

    let result: Result<BufferManager<u32>, _> =
        BufferManager::passthrough(BufferConfig::new(5000, 1000, 0));
    assert!(matches!(result, Err(IngestError::Config(_))));
}

#[test]
fn test_creation_requires_runtime() {
    let result: Result<BufferManager<u32>, _> =
        BufferManager::passthrough(BufferConfig::default());
    assert!(matches!(result, Err(IngestError::Config(_))));
}
