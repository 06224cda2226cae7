//! Timing samples scraped from worker logs.

use serde::{Deserialize, Serialize};

use crate::MetricKind;

/// Nanoseconds per second, used when converting samples for export.
pub const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// One timing measurement reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    /// What was measured.
    pub kind: MetricKind,
    /// Measured duration in nanoseconds.
    pub value_ns: u64,
    /// Ordinal of the experiment run that was active when the line arrived.
    pub run: u64,
}

impl MetricSample {
    /// Create a new sample.
    pub fn new(kind: MetricKind, value_ns: u64, run: u64) -> Self {
        Self {
            kind,
            value_ns,
            run,
        }
    }
}
