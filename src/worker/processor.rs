use std::marker::PhantomData;

use async_trait::async_trait;

use crate::buffer::RunStats;
use crate::error::BoxError;

/// Outcome of processing one item. `Ok(None)` means the item was handled but
/// produced nothing worth collecting.
pub type ProcessResult<R> = std::result::Result<Option<R>, BoxError>;

/// The per-item contract applied by every worker.
///
/// Implementations receive the run's [`RunStats`] so they can count the
/// inserts, updates and deletes they perform downstream. The worker itself
/// counts processed and failed items.
#[async_trait]
pub trait Processor<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    type Output: Send + 'static;

    async fn process(&self, item: T, stats: &RunStats) -> ProcessResult<Self::Output>;
}

/// Collects every item verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl<T> Processor<T> for Passthrough
where
    T: Send + 'static,
{
    type Output = T;

    async fn process(&self, item: T, _stats: &RunStats) -> ProcessResult<T> {
        Ok(Some(item))
    }
}

/// Adapts a synchronous closure into a [`Processor`].
pub struct FnProcessor<F, T> {
    f: F,
    _item: PhantomData<fn(T)>,
}

impl<F, T> FnProcessor<F, T> {
    pub fn new<R>(f: F) -> Self
    where
        F: Fn(T, &RunStats) -> ProcessResult<R>,
    {
        Self {
            f,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, R> Processor<T> for FnProcessor<F, T>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T, &RunStats) -> ProcessResult<R> + Send + Sync + 'static,
{
    type Output = R;

    async fn process(&self, item: T, stats: &RunStats) -> ProcessResult<R> {
        (self.f)(item, stats)
    }
}
