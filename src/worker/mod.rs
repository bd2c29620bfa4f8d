//! Workers that drain a [`WorkQueue`](crate::buffer::WorkQueue).
//!
//! The scheduling loop is fixed; what happens to each item is injected:
//! - **Processor**: the per-item contract ([`Processor`]), with
//!   [`Passthrough`] collecting items verbatim and [`FnProcessor`] wrapping a
//!   plain closure
//! - **Consumer**: the loop itself ([`Worker`]), which takes bites from the
//!   queue, records results and counters, and exits once the queue stays idle
//!
//! # Consume Flow
//!
//! 1. Take up to `bite_size` items without blocking
//! 2. If none were available, wait up to the idle timeout for one
//! 3. Process each item, appending outputs to the shared collector
//! 4. Yield, then repeat until the idle wait comes back empty
//!
//! # Failure Handling
//!
//! Under [`FailurePolicy::Isolate`](crate::config::FailurePolicy::Isolate) a
//! failed item is logged and counted. Under
//! [`FailurePolicy::Abort`](crate::config::FailurePolicy::Abort) the worker
//! stops and returns the rest of its bite to the queue.

pub mod consumer;
pub mod processor;

pub use consumer::{ConsumerHook, Worker, WorkerExit, WorkerSummary};
pub use processor::{FnProcessor, Passthrough, ProcessResult, Processor};
