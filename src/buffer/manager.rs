use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::buffer::{ResultCollector, RunStats, WorkQueue};
use crate::config::BufferConfig;
use crate::error::{IngestError, Result};
use crate::worker::{ConsumerHook, Passthrough, Processor, Worker, WorkerSummary};

/// Callback run once per drain with the full result set.
pub type BufferHook<R> = Arc<dyn Fn(&[R]) + Send + Sync>;

/// A spawned worker owned by the manager.
struct WorkerHandle {
    id: u64,
    handle: JoinHandle<WorkerSummary>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Accepts items from a producer without blocking and scales a pool of
/// [`Worker`]s to the backlog.
///
/// The first submission of a run starts one worker. Each later submission
/// starts another while the backlog exceeds `trigger_limit`, up to
/// `max_consumers` running at once. [`drain`](Self::drain) waits for every
/// worker to go idle and returns what they collected.
///
/// `submit` and `drain` take `&mut self`: the running set has a single
/// writer. Producers on several tasks need to wrap the manager in a lock.
pub struct BufferManager<T, P = Passthrough>
where
    T: Send + 'static,
    P: Processor<T>,
{
    config: BufferConfig,
    runtime: Handle,
    run_id: Uuid,
    queue: Arc<WorkQueue<T>>,
    collector: Arc<ResultCollector<P::Output>>,
    stats: Arc<RunStats>,
    processor: Arc<P>,
    running: Vec<WorkerHandle>,
    exited: Vec<WorkerHandle>,
    next_worker_id: u64,
    peak_workers: usize,
    on_consumer_complete: Option<ConsumerHook<P::Output>>,
    on_buffer_complete: Option<BufferHook<P::Output>>,
}

impl<T> BufferManager<T, Passthrough>
where
    T: Send + 'static,
{
    /// A manager whose workers collect every item unchanged.
    pub fn passthrough(config: BufferConfig) -> Result<Self> {
        Self::new(config, Passthrough)
    }
}

impl<T, P> BufferManager<T, P>
where
    T: Send + 'static,
    P: Processor<T>,
{
    /// Create a manager on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`IngestError::Config`] if the configuration is invalid or no tokio
    /// runtime is running.
    pub fn new(config: BufferConfig, processor: P) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            IngestError::Config("BufferManager must be created inside a tokio runtime".into())
        })?;

        let run_id = Uuid::new_v4();
        tracing::info!(
            run_id = %run_id,
            trigger_limit = config.trigger_limit,
            bite_size = config.bite_size,
            max_consumers = config.max_consumers,
            failure_policy = %config.failure_policy,
            "Buffer created"
        );

        Ok(Self {
            config,
            runtime,
            run_id,
            queue: Arc::new(WorkQueue::new()),
            collector: Arc::new(ResultCollector::new()),
            stats: Arc::new(RunStats::new()),
            processor: Arc::new(processor),
            running: Vec::new(),
            exited: Vec::new(),
            next_worker_id: 1,
            peak_workers: 0,
            on_consumer_complete: None,
            on_buffer_complete: None,
        })
    }

    /// Run `hook` each time a worker exits, before the buffer has drained.
    pub fn on_consumer_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkerSummary, &[P::Output]) + Send + Sync + 'static,
    {
        self.on_consumer_complete = Some(Arc::new(hook));
        self
    }

    /// Run `hook` once at the end of every drain with the full results.
    pub fn on_buffer_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[P::Output]) + Send + Sync + 'static,
    {
        self.on_buffer_complete = Some(Arc::new(hook));
        self
    }

    /// Enqueue `item` and start workers as the backlog requires.
    ///
    /// Never waits on workers. Submitting after a drain starts a new run with
    /// fresh statistics.
    pub fn submit(&mut self, item: T) -> Result<()> {
        if self.stats.is_finished() {
            self.start_new_run();
        }
        self.stats.mark_started();

        self.queue.push(item)?;
        self.reap_exited();

        if self.running.is_empty() {
            self.spawn_worker();
        } else if self.queue.len() > self.config.trigger_limit
            && self.running.len() < self.config.max_consumers
        {
            self.spawn_worker();
        }

        Ok(())
    }

    /// Wait for every worker to exit and return the collected results.
    ///
    /// Should be called once the producer has stopped submitting.
    pub async fn drain(&mut self) -> Vec<P::Output> {
        loop {
            let workers: Vec<WorkerHandle> = self
                .exited
                .drain(..)
                .chain(self.running.drain(..))
                .collect();
            for worker in workers {
                self.join_worker(worker).await;
            }

            if self.queue.is_empty() {
                break;
            }

            // An item raced a worker's idle exit, or an aborting worker handed
            // its bite back
            tracing::debug!(
                run_id = %self.run_id,
                backlog = self.queue.len(),
                "Items left after workers exited"
            );
            self.spawn_worker();
        }

        self.stats.mark_finished();
        let results = self.collector.take();

        tracing::info!(
            run_id = %self.run_id,
            results = results.len(),
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            peak_workers = self.peak_workers,
            rate = ?self.stats.average_rate().ok(),
            "Buffer drained"
        );

        if let Some(hook) = &self.on_buffer_complete {
            hook(&results);
        }

        results
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Statistics of the current run.
    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    /// Items waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    /// Workers that have not exited yet.
    pub fn running_workers(&self) -> usize {
        self.running.iter().filter(|w| w.is_alive()).count()
    }

    /// Most workers tracked as running at once since creation.
    pub fn peak_workers(&self) -> usize {
        self.peak_workers
    }

    /// Workers spawned since creation, across all runs.
    pub fn workers_started(&self) -> u64 {
        self.next_worker_id - 1
    }

    fn start_new_run(&mut self) {
        self.run_id = Uuid::new_v4();
        self.stats = Arc::new(RunStats::new());
        tracing::info!(run_id = %self.run_id, "Starting new buffer run");
    }

    fn spawn_worker(&mut self) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let worker = Worker::new(
            id,
            self.run_id,
            self.queue.clone(),
            self.collector.clone(),
            self.stats.clone(),
            self.processor.clone(),
            &self.config,
        )
        .with_completion_hook(self.on_consumer_complete.clone());

        let handle = self.runtime.spawn(worker.run());
        self.running.push(WorkerHandle { id, handle });
        self.peak_workers = self.peak_workers.max(self.running_workers());

        tracing::debug!(
            run_id = %self.run_id,
            worker_id = id,
            running = self.running.len(),
            backlog = self.queue.len(),
            "Worker spawned"
        );
    }

    /// Move workers that have exited out of the running set.
    fn reap_exited(&mut self) {
        if self.running.iter().all(WorkerHandle::is_alive) {
            return;
        }
        let (alive, exited): (Vec<_>, Vec<_>) = std::mem::take(&mut self.running)
            .into_iter()
            .partition(WorkerHandle::is_alive);
        self.running = alive;
        self.exited.extend(exited);
    }

    async fn join_worker(&self, worker: WorkerHandle) {
        match worker.handle.await {
            Ok(summary) => {
                tracing::debug!(
                    run_id = %self.run_id,
                    worker_id = summary.worker_id,
                    processed = summary.processed,
                    exit = %summary.exit,
                    "Worker joined"
                );
            }
            Err(e) if e.is_panic() => {
                tracing::error!(run_id = %self.run_id, worker_id = worker.id, "Worker panicked");
            }
            Err(e) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    worker_id = worker.id,
                    error = %e,
                    "Worker task did not complete"
                );
            }
        }
    }
}
