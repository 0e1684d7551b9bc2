//! Scoped timing measurements for offline profiling.
//!
//! A [`ScopedTimer`] measures the lifetime of a scope and, on drop, appends
//! a [`TimingRecord`] to a shared [`TimingLog`] and emits a debug event.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// One finished measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub name: String,
    /// Timestamp of the data being processed (not wall-clock).
    pub timestamp_ns: u64,
    pub elapsed: Duration,
}

impl TimingRecord {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Thread-safe sink for timing records.
#[derive(Debug, Default)]
pub struct TimingLog {
    records: Mutex<Vec<TimingRecord>>,
}

impl TimingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: TimingRecord) {
        self.records.lock().push(record);
    }

    /// Copy of all records collected so far.
    pub fn records(&self) -> Vec<TimingRecord> {
        self.records.lock().clone()
    }

    /// Records whose name matches exactly.
    pub fn records_named(&self, name: &str) -> Vec<TimingRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

/// Measures the enclosing scope.
pub struct ScopedTimer<'a> {
    name: String,
    timestamp_ns: u64,
    start: Instant,
    log: Option<&'a TimingLog>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(name: impl Into<String>, timestamp_ns: u64, log: Option<&'a TimingLog>) -> Self {
        Self {
            name: name.into(),
            timestamp_ns,
            start: Instant::now(),
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            "[timer] {} @ {}: {:.3} ms",
            self.name,
            self.timestamp_ns,
            elapsed.as_secs_f64() * 1000.0
        );

        if let Some(log) = self.log {
            log.push(TimingRecord {
                name: std::mem::take(&mut self.name),
                timestamp_ns: self.timestamp_ns,
                elapsed,
            });
        }
    }
}
