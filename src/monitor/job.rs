use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a remote report as reported by the vendor service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Queued,
    Running,
    Paused,
    Finished,
    Cancelled,
    Error,
}

impl ReportStatus {
    /// No further status change is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportStatus::Finished | ReportStatus::Cancelled | ReportStatus::Error
        )
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Queued => write!(f, "queued"),
            ReportStatus::Running => write!(f, "running"),
            ReportStatus::Paused => write!(f, "paused"),
            ReportStatus::Finished => write!(f, "finished"),
            ReportStatus::Cancelled => write!(f, "cancelled"),
            ReportStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    /// Accepts the vendor's state names, which vary in spelling between API
    /// versions.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" | "submitted" | "scheduled" => Ok(ReportStatus::Queued),
            "running" => Ok(ReportStatus::Running),
            "paused" => Ok(ReportStatus::Paused),
            "finished" | "completed" => Ok(ReportStatus::Finished),
            "cancelled" | "canceled" => Ok(ReportStatus::Cancelled),
            "error" | "errors" => Ok(ReportStatus::Error),
            other => Err(format!("unknown report status: {}", other)),
        }
    }
}

/// A map whose report is being generated or monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReference {
    /// Vendor map reference, when the map has one.
    pub map_ref: Option<String>,
    pub map_name: String,
    pub report_id: Option<u64>,
    pub status: Option<ReportStatus>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl JobReference {
    pub fn new(map_name: impl Into<String>) -> Self {
        Self {
            map_ref: None,
            map_name: map_name.into(),
            report_id: None,
            status: None,
            last_checked: None,
        }
    }

    pub fn with_ref(mut self, map_ref: impl Into<String>) -> Self {
        self.map_ref = Some(map_ref.into());
        self
    }

    /// Cache key for this job: the map reference, or the name when the map
    /// has no reference.
    pub fn key(&self) -> &str {
        self.map_ref.as_deref().unwrap_or(&self.map_name)
    }

    pub fn has_report(&self) -> bool {
        self.report_id.is_some()
    }

    /// Link a freshly created report. The report starts out queued.
    pub fn set_report(&mut self, report_id: u64) {
        self.report_id = Some(report_id);
        self.status = Some(ReportStatus::Queued);
    }

    pub fn record_status(&mut self, status: ReportStatus, at: DateTime<Utc>) {
        self.status = Some(status);
        self.last_checked = Some(at);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }
}

impl std::fmt::Display for JobReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "map '{}' ({})", self.map_name, self.key())?;
        if let Some(id) = self.report_id {
            write!(f, " report {}", id)?;
        }
        Ok(())
    }
}

/// Where the monitor is in handling a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No report is linked yet.
    NoReport,
    /// A create-report call is in flight or waiting out the concurrency limit.
    ReportRequested,
    /// A report exists and its status is being checked.
    Polling,
    Terminal(ReportStatus),
}

impl MonitorState {
    /// Initial state for a job as it comes off the queue.
    pub fn for_job(job: &JobReference) -> Self {
        match (job.report_id, job.status) {
            (Some(_), Some(status)) if status.is_terminal() => MonitorState::Terminal(status),
            (Some(_), _) => MonitorState::Polling,
            (None, _) => MonitorState::NoReport,
        }
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::NoReport => write!(f, "no-report"),
            MonitorState::ReportRequested => write!(f, "report-requested"),
            MonitorState::Polling => write!(f, "polling"),
            MonitorState::Terminal(status) => write!(f, "terminal({})", status),
        }
    }
}
