//! Report monitoring for vendor maps.
//!
//! A [`JobMonitor`] consumes [`JobReference`]s from its own queue and takes
//! each one to a terminal [`ReportStatus`]:
//!
//! ```text
//! NoReport --(cache has none)--> ReportRequested --(created)--> Polling --> Terminal
//!    ^                                  |
//!    +------(concurrency limit, sleep)--+
//! ```
//!
//! Report state is shared with other processes through a [`StatusCache`];
//! the monitor re-reads it before creating a report and writes every observed
//! status back. The remote service is reached through [`ReportApi`].

pub mod api;
pub mod backoff;
pub mod cache;
pub mod job;
pub mod runner;

pub use api::{CreateOutcome, ReportApi};
pub use cache::{InMemoryStatusCache, StatusCache, StatusCacheFactory};
pub use job::{JobReference, MonitorState, ReportStatus};
pub use runner::{JobMonitor, JobMonitorBuilder, MonitorSnapshot, MonitorStats};
