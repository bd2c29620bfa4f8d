use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// What a worker does when the processor fails on a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Log the failure, count it, and keep consuming.
    #[default]
    Isolate,
    /// Stop the worker after the failing item.
    Abort,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Isolate => write!(f, "isolate"),
            FailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Configuration for a [`BufferManager`](crate::buffer::BufferManager) and the
/// workers it spawns.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Backlog length past which another worker is started.
    pub trigger_limit: usize,
    /// Items a worker withdraws per scheduling turn.
    pub bite_size: usize,
    /// Hard cap on concurrently running workers.
    pub max_consumers: usize,
    /// How long a worker waits on an empty queue before exiting.
    pub idle_timeout_ms: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            trigger_limit: 5000,
            bite_size: 1000,
            max_consumers: 5,
            idle_timeout_ms: 500,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

impl BufferConfig {
    pub fn new(trigger_limit: usize, bite_size: usize, max_consumers: usize) -> Self {
        Self {
            trigger_limit,
            bite_size,
            max_consumers,
            ..Default::default()
        }
    }

    pub fn with_idle_timeout_ms(mut self, idle_timeout_ms: u64) -> Self {
        self.idle_timeout_ms = idle_timeout_ms;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trigger_limit == 0 {
            return Err(IngestError::Config("trigger_limit must be > 0".into()));
        }
        if self.bite_size == 0 {
            return Err(IngestError::Config("bite_size must be > 0".into()));
        }
        if self.max_consumers == 0 {
            return Err(IngestError::Config("max_consumers must be > 0".into()));
        }
        Ok(())
    }
}

/// Bounded exponential backoff for remote calls that fail for reasons other
/// than the concurrency limit.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// Configuration for a [`JobMonitor`](crate::monitor::JobMonitor).
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long the monitor waits on an empty queue before shutting down.
    pub idle_timeout_ms: u64,
    /// Delay between status checks of a running report.
    pub poll_interval_ms: u64,
    /// Sleep applied when the remote service reports its concurrency limit.
    pub concurrency_backoff_ms: u64,
    /// Give up (mark `Error`) after this many concurrency-limit waits.
    /// `None` waits forever.
    pub max_concurrency_waits: Option<u32>,
    /// Give up (mark `Error`) after this many non-terminal status checks.
    /// `None` polls forever.
    pub max_status_checks: Option<u32>,
    pub retry: RetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1000,
            poll_interval_ms: 5000,
            concurrency_backoff_ms: 30_000,
            max_concurrency_waits: None,
            // One hour at the default poll interval
            max_status_checks: Some(720),
            retry: RetryConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_concurrency_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.concurrency_backoff_ms = backoff_ms;
        self
    }

    pub fn with_max_status_checks(mut self, max: Option<u32>) -> Self {
        self.max_status_checks = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn concurrency_backoff(&self) -> Duration {
        Duration::from_millis(self.concurrency_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(IngestError::Config("retry.max_attempts must be > 0".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(IngestError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}
