use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{IngestError, Result};

/// Counters and timing for a single buffer run.
///
/// Counters only ever grow within a run. `start_time` and `end_time` are set
/// at most once each; the first mark wins.
#[derive(Debug, Default)]
pub struct RunStats {
    processed: AtomicU64,
    failed: AtomicU64,
    updates: AtomicU64,
    adds: AtomicU64,
    deletes: AtomicU64,
    start_time: Mutex<Option<DateTime<Utc>>>,
    end_time: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub updates: u64,
    pub adds: u64,
    pub deletes: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Items per second, when both timestamps are set and differ.
    pub average_rate: Option<f64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_insertions(&self) {
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deletions(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn adds(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn mark_started(&self) {
        self.mark_started_at(Utc::now());
    }

    pub fn mark_started_at(&self, at: DateTime<Utc>) {
        self.start_time.lock().get_or_insert(at);
    }

    pub fn mark_finished(&self) {
        self.mark_finished_at(Utc::now());
    }

    pub fn mark_finished_at(&self, at: DateTime<Utc>) {
        self.end_time.lock().get_or_insert(at);
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        *self.start_time.lock()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        *self.end_time.lock()
    }

    pub fn is_started(&self) -> bool {
        self.start_time().is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.end_time().is_some()
    }

    /// Items processed per second over the run window.
    ///
    /// # Errors
    ///
    /// [`IngestError::DivisionUndefined`] when either timestamp is unset or
    /// the window is empty.
    pub fn average_rate(&self) -> Result<f64> {
        let start = self
            .start_time()
            .ok_or(IngestError::DivisionUndefined("start_time is not set"))?;
        let end = self
            .end_time()
            .ok_or(IngestError::DivisionUndefined("end_time is not set"))?;

        let micros = (end - start)
            .num_microseconds()
            .ok_or(IngestError::DivisionUndefined("run window overflows"))?;
        if micros <= 0 {
            return Err(IngestError::DivisionUndefined(
                "end_time does not follow start_time",
            ));
        }

        Ok(self.processed() as f64 / (micros as f64 / 1_000_000.0))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed(),
            failed: self.failed(),
            updates: self.updates(),
            adds: self.adds(),
            deletes: self.deletes(),
            start_time: self.start_time(),
            end_time: self.end_time(),
            average_rate: self.average_rate().ok(),
        }
    }
}
