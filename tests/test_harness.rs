//! Scripted collaborators for report monitor tests.
//!
//! Provides a report service whose responses are fixed up front and a cache
//! factory that never connects.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ingest_buffer::buffer::WorkQueue;
use ingest_buffer::config::{MonitorConfig, RetryConfig};
use ingest_buffer::monitor::{
    CreateOutcome, InMemoryStatusCache, JobMonitor, JobReference, ReportApi, ReportStatus,
    StatusCache, StatusCacheFactory,
};
use ingest_buffer::{IngestError, Result};

/// Monitor configuration with short delays and a small retry budget.
pub fn test_monitor_config() -> MonitorConfig {
    MonitorConfig {
        idle_timeout_ms: 100,
        poll_interval_ms: 1_000,
        concurrency_backoff_ms: 10_000,
        max_concurrency_waits: None,
        max_status_checks: Some(50),
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        },
    }
}

/// Report service with scripted answers.
///
/// `create_report` returns queued outcomes in order, then creates reports
/// with increasing ids. `poll_status` walks each report through the status
/// script and repeats its last entry.
pub struct MockReportApi {
    create_script: Mutex<VecDeque<CreateOutcome>>,
    status_script: Vec<ReportStatus>,
    failing_creates: AtomicU32,
    failing_polls: AtomicU32,
    next_report_id: AtomicU64,
    polls: Mutex<HashMap<u64, usize>>,
    pub create_calls: AtomicU32,
    pub poll_calls: AtomicU32,
}

impl MockReportApi {
    pub fn new(status_script: Vec<ReportStatus>) -> Self {
        Self {
            create_script: Mutex::new(VecDeque::new()),
            status_script,
            failing_creates: AtomicU32::new(0),
            failing_polls: AtomicU32::new(0),
            next_report_id: AtomicU64::new(100),
            polls: Mutex::new(HashMap::new()),
            create_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
        }
    }

    /// Reports go queued, running, then finished.
    pub fn finishing() -> Self {
        Self::new(vec![
            ReportStatus::Queued,
            ReportStatus::Running,
            ReportStatus::Finished,
        ])
    }

    pub fn with_create_outcomes(self, outcomes: Vec<CreateOutcome>) -> Self {
        *self.create_script.lock().unwrap() = outcomes.into();
        self
    }

    /// The next `n` create calls fail with a remote error.
    pub fn failing_creates(self, n: u32) -> Self {
        self.failing_creates.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` status polls fail with a remote error.
    pub fn failing_polls(self, n: u32) -> Self {
        self.failing_polls.store(n, Ordering::SeqCst);
        self
    }

    pub fn creates(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ReportApi for MockReportApi {
    async fn create_report(&self, _job: &JobReference) -> Result<CreateOutcome> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_creates) {
            return Err(IngestError::Remote("service unavailable".into()));
        }
        if let Some(outcome) = self.create_script.lock().unwrap().pop_front() {
            return Ok(outcome);
        }
        let id = self.next_report_id.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created(id))
    }

    async fn poll_status(&self, report_id: u64) -> Result<ReportStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_polls) {
            return Err(IngestError::Remote("status endpoint timed out".into()));
        }
        let mut polls = self.polls.lock().unwrap();
        let seen = polls.entry(report_id).or_insert(0);
        let idx = (*seen).min(self.status_script.len().saturating_sub(1));
        *seen += 1;
        self.status_script
            .get(idx)
            .copied()
            .ok_or_else(|| IngestError::Remote("no status scripted".into()))
    }
}

/// Cache factory whose connections always fail.
pub struct UnreachableCache {
    pub attempts: AtomicU32,
}

impl UnreachableCache {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StatusCacheFactory for UnreachableCache {
    async fn connect(&self) -> Result<Box<dyn StatusCache>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(IngestError::Cache("connection refused".into()))
    }
}

/// Build a monitor over a fresh queue, returning the queue for pushing jobs.
pub fn build_monitor(
    config: MonitorConfig,
    cache: &InMemoryStatusCache,
    api: Arc<MockReportApi>,
) -> (JobMonitor, Arc<WorkQueue<JobReference>>) {
    let queue = Arc::new(WorkQueue::new());
    let monitor = JobMonitor::builder()
        .config(config)
        .queue(queue.clone())
        .cache(Arc::new(cache.clone()))
        .api(api)
        .build()
        .expect("monitor should build");
    (monitor, queue)
}
