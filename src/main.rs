use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use ingest_buffer::buffer::{BufferManager, RunStats, StatsSnapshot, WorkQueue};
use ingest_buffer::config::{BufferConfig, FailurePolicy, MonitorConfig};
use ingest_buffer::error::Result as IngestResult;
use ingest_buffer::monitor::{
    CreateOutcome, InMemoryStatusCache, JobMonitor, JobReference, MonitorSnapshot, ReportApi,
    ReportStatus,
};
use ingest_buffer::shutdown::install_shutdown_handler;
use ingest_buffer::worker::{ProcessResult, Processor};

#[derive(Parser, Debug)]
#[command(name = "ingest-buffer")]
#[command(version)]
#[command(about = "Drive the ingest buffer and report monitor with synthetic load")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Push synthetic records through a buffer and report throughput
    Load(LoadArgs),

    /// Run report monitors against a simulated report service
    Monitor(MonitorArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct LoadArgs {
    /// Number of records to submit
    #[arg(long, default_value = "100000")]
    items: u64,

    /// Backlog length that justifies another worker
    #[arg(long, default_value = "5000")]
    trigger_limit: usize,

    /// Records a worker takes per turn
    #[arg(long, default_value = "1000")]
    bite_size: usize,

    /// Maximum concurrent workers
    #[arg(long, default_value = "5")]
    max_consumers: usize,

    /// Simulated processing time per record, in microseconds
    #[arg(long, default_value = "0")]
    work_us: u64,

    /// Fail every Nth record to exercise the failure policy
    #[arg(long)]
    fail_every: Option<u64>,

    /// Stop a worker on the first failed record instead of skipping it
    #[arg(long)]
    abort_on_failure: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct MonitorArgs {
    /// Number of maps to generate reports for
    #[arg(long, default_value = "5")]
    jobs: u64,

    /// Number of monitors sharing the queue and cache
    #[arg(long, default_value = "2")]
    monitors: usize,

    /// Status checks before a simulated report finishes
    #[arg(long, default_value = "3")]
    polls_to_finish: u32,

    /// How long the simulated service refuses new reports, in milliseconds
    #[arg(long, default_value = "0")]
    busy_ms: u64,

    /// Delay between status checks, in milliseconds
    #[arg(long, default_value = "200")]
    poll_interval_ms: u64,

    /// Sleep after a concurrency-limit response, in milliseconds
    #[arg(long, default_value = "500")]
    backoff_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct LoadOutput {
    submitted: u64,
    results: usize,
    peak_workers: usize,
    workers_started: u64,
    stats: StatsSnapshot,
}

#[derive(Serialize)]
struct MonitorOutput {
    monitors: Vec<MonitorSnapshot>,
    cached_jobs: usize,
}

// =============================================================================
// Simulated Collaborators
// =============================================================================

#[derive(Debug)]
struct SyntheticRecord {
    id: u64,
}

/// Stands in for a database writer: even ids are inserts, odd ids updates.
struct SimulatedWriter {
    latency: Duration,
    fail_every: Option<u64>,
}

#[async_trait]
impl Processor<SyntheticRecord> for SimulatedWriter {
    type Output = u64;

    async fn process(&self, record: SyntheticRecord, stats: &RunStats) -> ProcessResult<u64> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(n) = self.fail_every.filter(|n| *n > 0) {
            if record.id % n == n - 1 {
                return Err(format!("simulated write failure for record {}", record.id).into());
            }
        }
        if record.id % 2 == 0 {
            stats.increment_insertions();
        } else {
            stats.increment_updates();
        }
        Ok(Some(record.id))
    }
}

/// Report service that refuses new reports until `busy_until`, then finishes
/// each report after a fixed number of status checks.
struct SimulatedReportService {
    busy_until: Instant,
    polls_to_finish: u32,
    next_id: AtomicU64,
    polls: tokio::sync::Mutex<std::collections::HashMap<u64, u32>>,
}

#[async_trait]
impl ReportApi for SimulatedReportService {
    async fn create_report(&self, job: &JobReference) -> IngestResult<CreateOutcome> {
        if Instant::now() < self.busy_until {
            return Ok(CreateOutcome::ConcurrencyLimited);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.polls.lock().await.insert(id, 0);
        tracing::debug!(map_key = job.key(), report_id = id, "Simulated report created");
        Ok(CreateOutcome::Created(id))
    }

    async fn poll_status(&self, report_id: u64) -> IngestResult<ReportStatus> {
        let mut polls = self.polls.lock().await;
        let count = polls.entry(report_id).or_insert(0);
        *count += 1;
        Ok(match *count {
            n if n >= self.polls_to_finish => ReportStatus::Finished,
            1 => ReportStatus::Queued,
            _ => ReportStatus::Running,
        })
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run_load(args: LoadArgs) -> Result<(), Box<dyn std::error::Error>> {
    let policy = if args.abort_on_failure {
        FailurePolicy::Abort
    } else {
        FailurePolicy::Isolate
    };
    let config = BufferConfig::new(args.trigger_limit, args.bite_size, args.max_consumers)
        .with_failure_policy(policy);
    let writer = SimulatedWriter {
        latency: Duration::from_micros(args.work_us),
        fail_every: args.fail_every,
    };

    let shutdown = install_shutdown_handler();
    let mut buffer = BufferManager::new(config, writer)?;

    let mut submitted = 0u64;
    for id in 0..args.items {
        if shutdown.is_cancelled() {
            tracing::warn!(submitted, "Shutdown requested, draining buffered records");
            break;
        }
        buffer.submit(SyntheticRecord { id })?;
        submitted += 1;
        if submitted % 1000 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let stats = buffer.stats();
    let results = buffer.drain().await;
    let output = LoadOutput {
        submitted,
        results: results.len(),
        peak_workers: buffer.peak_workers(),
        workers_started: buffer.workers_started(),
        stats: stats.snapshot(),
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!("Submitted:       {}", output.submitted);
            println!("Results:         {}", output.results);
            println!("Peak workers:    {}", output.peak_workers);
            println!("Workers started: {}", output.workers_started);
            println!("Inserts:         {}", output.stats.adds);
            println!("Updates:         {}", output.stats.updates);
            println!("Failed:          {}", output.stats.failed);
            match output.stats.average_rate {
                Some(rate) => println!("Rate:            {:.0} records/s", rate),
                None => println!("Rate:            n/a"),
            }
        }
    }
    Ok(())
}

async fn run_monitor(args: MonitorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let queue = Arc::new(WorkQueue::new());
    let cache = InMemoryStatusCache::new();
    let service = Arc::new(SimulatedReportService {
        busy_until: Instant::now() + Duration::from_millis(args.busy_ms),
        polls_to_finish: args.polls_to_finish.max(1),
        next_id: AtomicU64::new(1),
        polls: tokio::sync::Mutex::new(std::collections::HashMap::new()),
    });
    let config = MonitorConfig::default()
        .with_poll_interval_ms(args.poll_interval_ms)
        .with_concurrency_backoff_ms(args.backoff_ms);

    for n in 0..args.jobs {
        queue.push(JobReference::new(format!("map-{}", n)).with_ref(format!("map/{}", n)))?;
    }

    let mut handles = Vec::with_capacity(args.monitors);
    for _ in 0..args.monitors.max(1) {
        let monitor = JobMonitor::builder()
            .config(config.clone())
            .queue(queue.clone())
            .cache(Arc::new(cache.clone()))
            .api(service.clone())
            .build()?;
        handles.push(monitor.spawn());
    }

    let mut monitors = Vec::with_capacity(handles.len());
    for handle in handles {
        monitors.push(handle.await??);
    }
    let output = MonitorOutput {
        monitors,
        cached_jobs: cache.len().await,
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!(
                "{:<8} {:>5} {:>8} {:>8} {:>8} {:>8} {:>7}",
                "MONITOR", "JOBS", "CREATED", "BACKOFFS", "CHECKS", "FINISHED", "FAILED"
            );
            for (n, m) in output.monitors.iter().enumerate() {
                println!(
                    "{:<8} {:>5} {:>8} {:>8} {:>8} {:>8} {:>7}",
                    n + 1,
                    m.jobs,
                    m.reports_created,
                    m.concurrency_backoffs,
                    m.status_checks,
                    m.finished,
                    m.failed
                );
            }
            println!("Cached jobs: {}", output.cached_jobs);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Load(load) => run_load(load).await,
        Commands::Monitor(monitor) => run_monitor(monitor).await,
    }
}
