pub mod collector;
pub mod manager;
pub mod queue;
pub mod stats;

pub use collector::ResultCollector;
pub use manager::{BufferHook, BufferManager};
pub use queue::WorkQueue;
pub use stats::{RunStats, StatsSnapshot};
