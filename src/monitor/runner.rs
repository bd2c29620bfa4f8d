use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::buffer::WorkQueue;
use crate::config::MonitorConfig;
use crate::error::{IngestError, Result};
use crate::monitor::api::{CreateOutcome, ReportApi};
use crate::monitor::backoff::retry_delay;
use crate::monitor::cache::{StatusCache, StatusCacheFactory};
use crate::monitor::job::{JobReference, MonitorState, ReportStatus};

/// Counters for one monitor's lifetime.
#[derive(Debug, Default)]
pub struct MonitorStats {
    jobs: AtomicU64,
    create_calls: AtomicU64,
    reports_created: AtomicU64,
    concurrency_backoffs: AtomicU64,
    status_checks: AtomicU64,
    retries: AtomicU64,
    finished: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub jobs: u64,
    pub create_calls: u64,
    pub reports_created: u64,
    pub concurrency_backoffs: u64,
    pub status_checks: u64,
    pub retries: u64,
    pub finished: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl MonitorStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            jobs: self.jobs.load(Ordering::Relaxed),
            create_calls: self.create_calls.load(Ordering::Relaxed),
            reports_created: self.reports_created.load(Ordering::Relaxed),
            concurrency_backoffs: self.concurrency_backoffs.load(Ordering::Relaxed),
            status_checks: self.status_checks.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Builds a [`JobMonitor`]. Queue, cache and report API are all required.
#[derive(Default)]
pub struct JobMonitorBuilder {
    config: MonitorConfig,
    queue: Option<Arc<WorkQueue<JobReference>>>,
    cache: Option<Arc<dyn StatusCacheFactory>>,
    api: Option<Arc<dyn ReportApi>>,
}

impl JobMonitorBuilder {
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue(mut self, queue: Arc<WorkQueue<JobReference>>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn StatusCacheFactory>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn api(mut self, api: Arc<dyn ReportApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// # Errors
    ///
    /// [`IngestError::Config`] when a collaborator is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<JobMonitor> {
        self.config.validate()?;
        let queue = self.queue.ok_or_else(|| {
            IngestError::Config("monitor initialized without an input queue".into())
        })?;
        let cache = self.cache.ok_or_else(|| {
            IngestError::Config("monitor initialized without a status cache".into())
        })?;
        let api = self.api.ok_or_else(|| {
            IngestError::Config("monitor initialized without a report API".into())
        })?;

        Ok(JobMonitor {
            config: self.config,
            queue,
            cache,
            api,
            stats: Arc::new(MonitorStats::default()),
        })
    }
}

/// Drives map reports from creation to a terminal status.
///
/// Jobs are taken one at a time from the monitor's queue. A job without a
/// report is first checked against the status cache, since another process
/// may have started one; only then is a report requested. When the service
/// is at its report concurrency limit the monitor sleeps and tries again.
/// Once a report exists it is polled until it finishes, with every observed
/// status written back to the cache.
///
/// The monitor stops when its queue stays empty for the idle timeout.
pub struct JobMonitor {
    config: MonitorConfig,
    queue: Arc<WorkQueue<JobReference>>,
    cache: Arc<dyn StatusCacheFactory>,
    api: Arc<dyn ReportApi>,
    stats: Arc<MonitorStats>,
}

impl JobMonitor {
    pub fn builder() -> JobMonitorBuilder {
        JobMonitorBuilder::default()
    }

    /// The inbound queue. Producers push job references here.
    pub fn queue(&self) -> Arc<WorkQueue<JobReference>> {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        self.stats.clone()
    }

    pub fn spawn(self) -> JoinHandle<Result<MonitorSnapshot>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Process jobs until the queue goes idle.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that make further progress
    /// impossible: the status cache cannot be reached or written. Remote
    /// failures are retried and then recorded on the job as `Error`.
    pub async fn run(&self) -> Result<MonitorSnapshot> {
        tracing::info!("Job monitor started");

        while let Some(mut job) = self.queue.pop_wait(self.config.idle_timeout()).await {
            MonitorStats::bump(&self.stats.jobs);
            let cache = self
                .with_retry("connect", job.key(), || self.cache.connect())
                .await?;

            let outcome = self.monitor_job(&mut job, cache.as_ref()).await?;
            match outcome {
                ReportStatus::Finished => MonitorStats::bump(&self.stats.finished),
                ReportStatus::Cancelled => MonitorStats::bump(&self.stats.cancelled),
                _ => MonitorStats::bump(&self.stats.failed),
            }
            tracing::info!(
                map_key = job.key(),
                report_id = ?job.report_id,
                status = %outcome,
                "Report reached terminal status"
            );
        }

        tracing::debug!("Queue timed out, assuming closed");
        let snapshot = self.stats.snapshot();
        tracing::info!(
            jobs = snapshot.jobs,
            finished = snapshot.finished,
            failed = snapshot.failed,
            "Job monitor stopped"
        );
        Ok(snapshot)
    }

    /// Walk one job through its state machine and return its terminal status.
    async fn monitor_job(
        &self,
        job: &mut JobReference,
        cache: &dyn StatusCache,
    ) -> Result<ReportStatus> {
        let mut state = MonitorState::for_job(job);
        let mut concurrency_waits = 0u32;
        let mut status_checks = 0u32;

        loop {
            tracing::debug!(map_key = job.key(), state = %state, "Monitoring job");
            state = match state {
                MonitorState::NoReport => {
                    self.refresh(job, cache).await?;
                    if job.has_report() {
                        tracing::info!(
                            map_key = job.key(),
                            report_id = ?job.report_id,
                            "Report already linked by another process"
                        );
                        MonitorState::for_job(job)
                    } else {
                        MonitorState::ReportRequested
                    }
                }
                MonitorState::ReportRequested => {
                    self.request_report(job, cache, &mut concurrency_waits)
                        .await?
                }
                MonitorState::Polling => match job.report_id {
                    Some(report_id) => {
                        self.check_status(job, cache, report_id, &mut status_checks)
                            .await?
                    }
                    None => MonitorState::NoReport,
                },
                MonitorState::Terminal(status) => return Ok(status),
            };
        }
    }

    async fn request_report(
        &self,
        job: &mut JobReference,
        cache: &dyn StatusCache,
        concurrency_waits: &mut u32,
    ) -> Result<MonitorState> {
        let job_ref: &JobReference = job;
        let outcome = self
            .with_retry("create_report", job_ref.key(), || {
                MonitorStats::bump(&self.stats.create_calls);
                self.api.create_report(job_ref)
            })
            .await;

        match outcome {
            Ok(CreateOutcome::Created(report_id)) => {
                job.set_report(report_id);
                MonitorStats::bump(&self.stats.reports_created);
                tracing::info!(map_key = job.key(), report_id, "Report created");
                self.store(job, cache).await?;
                Ok(MonitorState::Polling)
            }
            Ok(CreateOutcome::ConcurrencyLimited) => {
                *concurrency_waits += 1;
                if let Some(max) = self.config.max_concurrency_waits {
                    if *concurrency_waits > max {
                        tracing::warn!(
                            map_key = job.key(),
                            waits = max,
                            "Report concurrency limit never cleared, giving up"
                        );
                        return self.mark_error(job, cache).await;
                    }
                }

                MonitorStats::bump(&self.stats.concurrency_backoffs);
                tracing::info!(
                    map_key = job.key(),
                    wait = *concurrency_waits,
                    backoff_ms = self.config.concurrency_backoff_ms,
                    "Report concurrency limit reached, backing off"
                );
                tokio::time::sleep(self.config.concurrency_backoff()).await;

                // Someone else may have started the report while we slept
                Ok(MonitorState::NoReport)
            }
            Err(e) => {
                tracing::error!(map_key = job.key(), error = %e, "Could not create report");
                self.mark_error(job, cache).await
            }
        }
    }

    async fn check_status(
        &self,
        job: &mut JobReference,
        cache: &dyn StatusCache,
        report_id: u64,
        status_checks: &mut u32,
    ) -> Result<MonitorState> {
        if *status_checks > 0 {
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        *status_checks += 1;
        MonitorStats::bump(&self.stats.status_checks);

        let polled = self
            .with_retry("poll_status", job.key(), || self.api.poll_status(report_id))
            .await;
        let status = match polled {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(
                    map_key = job.key(),
                    report_id,
                    error = %e,
                    "Could not read report status"
                );
                return self.mark_error(job, cache).await;
            }
        };

        job.record_status(status, Utc::now());
        self.store(job, cache).await?;
        tracing::debug!(
            map_key = job.key(),
            report_id,
            status = %status,
            "Report status checked"
        );

        if status.is_terminal() {
            return Ok(MonitorState::Terminal(status));
        }
        if let Some(max) = self.config.max_status_checks {
            if *status_checks >= max {
                tracing::warn!(
                    map_key = job.key(),
                    report_id,
                    checks = max,
                    "Report did not finish within its status check budget"
                );
                return self.mark_error(job, cache).await;
            }
        }
        Ok(MonitorState::Polling)
    }

    async fn mark_error(
        &self,
        job: &mut JobReference,
        cache: &dyn StatusCache,
    ) -> Result<MonitorState> {
        job.record_status(ReportStatus::Error, Utc::now());
        self.store(job, cache).await?;
        Ok(MonitorState::Terminal(ReportStatus::Error))
    }

    async fn refresh(&self, job: &mut JobReference, cache: &dyn StatusCache) -> Result<()> {
        let current: &JobReference = job;
        let refreshed = self
            .with_retry("cache_refresh", current.key(), || {
                let mut probe = current.clone();
                async move { cache.refresh(&mut probe).await.map(|()| probe) }
            })
            .await?;
        *job = refreshed;
        Ok(())
    }

    async fn store(&self, job: &JobReference, cache: &dyn StatusCache) -> Result<()> {
        self.with_retry("cache_store", job.key(), || cache.store(job))
            .await
    }

    /// Run `op` until it succeeds or the retry budget is spent.
    async fn with_retry<F, Fut, O>(
        &self,
        operation: &'static str,
        map_key: &str,
        mut op: F,
    ) -> Result<O>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= retry.max_attempts => {
                    tracing::warn!(
                        map_key,
                        operation,
                        attempts = attempt,
                        error = %e,
                        "Giving up after repeated failures"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = retry_delay(attempt, retry);
                    MonitorStats::bump(&self.stats.retries);
                    tracing::warn!(
                        map_key,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
