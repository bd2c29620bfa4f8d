use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use uuid::Uuid;

use crate::buffer::{ResultCollector, RunStats, WorkQueue};
use crate::config::{BufferConfig, FailurePolicy};
use crate::worker::processor::Processor;

/// Callback run by each worker as it exits, with its summary and the
/// results collected by the whole run so far.
///
/// The collector is locked while the hook runs: the hook must not call back
/// into the buffer, and other workers of the run stall on their next
/// `extend` until it returns. Keep it short.
pub type ConsumerHook<R> = Arc<dyn Fn(&WorkerSummary, &[R]) + Send + Sync>;

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkerExit {
    /// The queue stayed empty for the idle timeout.
    Idle,
    /// The processor failed under [`FailurePolicy::Abort`].
    Aborted(String),
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExit::Idle => write!(f, "idle"),
            WorkerExit::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub worker_id: u64,
    pub processed: u64,
    pub failed: u64,
    pub exit: WorkerExit,
}

/// A single consumer of a [`WorkQueue`].
///
/// Each turn the worker takes a bite of up to `bite_size` items without
/// blocking. When nothing is queued it waits up to `idle_timeout` for one
/// more item and exits if none arrives.
pub struct Worker<T, P>
where
    T: Send + 'static,
    P: Processor<T>,
{
    id: u64,
    run_id: Uuid,
    queue: Arc<WorkQueue<T>>,
    collector: Arc<ResultCollector<P::Output>>,
    stats: Arc<RunStats>,
    processor: Arc<P>,
    bite_size: usize,
    idle_timeout: Duration,
    failure_policy: FailurePolicy,
    on_complete: Option<ConsumerHook<P::Output>>,
}

impl<T, P> Worker<T, P>
where
    T: Send + 'static,
    P: Processor<T>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        run_id: Uuid,
        queue: Arc<WorkQueue<T>>,
        collector: Arc<ResultCollector<P::Output>>,
        stats: Arc<RunStats>,
        processor: Arc<P>,
        config: &BufferConfig,
    ) -> Self {
        Self {
            id,
            run_id,
            queue,
            collector,
            stats,
            processor,
            bite_size: config.bite_size,
            idle_timeout: config.idle_timeout(),
            failure_policy: config.failure_policy,
            on_complete: None,
        }
    }

    pub fn with_completion_hook(mut self, hook: Option<ConsumerHook<P::Output>>) -> Self {
        self.on_complete = hook;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Consume until the queue goes idle or the processor aborts the worker.
    pub async fn run(self) -> WorkerSummary {
        tracing::debug!(run_id = %self.run_id, worker_id = self.id, "Worker started");

        let mut processed = 0u64;
        let mut failed = 0u64;

        let exit = loop {
            let mut bite = self.queue.pop_batch(self.bite_size);
            if bite.is_empty() {
                match self.queue.pop_wait(self.idle_timeout).await {
                    Some(item) => bite.push(item),
                    None => {
                        tracing::debug!(
                            run_id = %self.run_id,
                            worker_id = self.id,
                            "Queue timed out, assuming closed"
                        );
                        break WorkerExit::Idle;
                    }
                }
            }

            let mut outputs = Vec::with_capacity(bite.len());
            let mut abort_reason = None;
            let mut remaining = bite.into_iter();

            while let Some(item) = remaining.next() {
                let result = AssertUnwindSafe(self.processor.process(item, &self.stats))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(format!("processor panicked: {}", panic_message(panic)).into())
                    });
                match result {
                    Ok(output) => {
                        processed += 1;
                        self.stats.increment_processed();
                        outputs.extend(output);
                    }
                    Err(e) => {
                        failed += 1;
                        self.stats.increment_failed();
                        match self.failure_policy {
                            FailurePolicy::Isolate => {
                                tracing::warn!(
                                    run_id = %self.run_id,
                                    worker_id = self.id,
                                    error = %e,
                                    "Item processing failed, continuing"
                                );
                            }
                            FailurePolicy::Abort => {
                                tracing::error!(
                                    run_id = %self.run_id,
                                    worker_id = self.id,
                                    error = %e,
                                    "Item processing failed, stopping worker"
                                );
                                abort_reason = Some(e.to_string());
                                break;
                            }
                        }
                    }
                }
            }

            self.collector.extend(outputs);

            if let Some(reason) = abort_reason {
                // Unprocessed items of this bite go back for the next worker
                self.queue.requeue(remaining.collect());
                break WorkerExit::Aborted(reason);
            }

            tokio::task::yield_now().await;
        };

        let summary = WorkerSummary {
            worker_id: self.id,
            processed,
            failed,
            exit,
        };

        tracing::info!(
            run_id = %self.run_id,
            worker_id = self.id,
            processed,
            failed,
            exit = %summary.exit,
            "Worker finished"
        );

        if let Some(hook) = &self.on_complete {
            self.collector.with_results(|partial| hook(&summary, partial));
        }

        summary
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
