use async_trait::async_trait;

use crate::error::Result;
use crate::monitor::job::{JobReference, ReportStatus};

/// Response to a create-report request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(u64),
    /// The service is already running as many reports as it allows.
    ConcurrencyLimited,
}

/// Remote report service. Errors are transport or service failures; the
/// concurrency limit is not an error.
#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn create_report(&self, job: &JobReference) -> Result<CreateOutcome>;

    async fn poll_status(&self, report_id: u64) -> Result<ReportStatus>;
}
