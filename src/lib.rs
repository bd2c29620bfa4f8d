pub mod buffer;
pub mod config;
pub mod error;
pub mod monitor;
pub mod shutdown;
pub mod worker;

pub use buffer::{BufferManager, RunStats, WorkQueue};
pub use error::{IngestError, Result};
pub use monitor::JobMonitor;
