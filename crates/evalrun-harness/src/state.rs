//! State shared between stream readers and the control flow.
//!
//! Stream readers only ever set readiness flags and append samples; the
//! coordinator and sweep driver clear flags and drain samples. There is at
//! most one restartable worker at a time, so no further coordination is
//! needed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use evalrun_core::{MetricKind, MetricSample, WorkerRole};
use tokio::sync::{watch, Notify};

/// Set-once-per-run flag signalled by a worker's readiness marker.
///
/// Backed by a watch channel so waiters are woken as soon as the flag flips
/// instead of sleeping in a poll loop.
#[derive(Debug)]
pub struct ReadinessFlag {
    tx: watch::Sender<bool>,
}

impl Default for ReadinessFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Set the flag. Returns true only for the call that actually flipped it.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Clear the flag for the next run.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Append-only buffer of timing samples, stamped with the active run ordinal.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Mutex<Vec<MetricSample>>,
    current_run: AtomicU64,
    recorded: Notify,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MetricSample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attribute subsequent samples to run `ordinal`.
    pub fn begin_run(&self, ordinal: u64) {
        self.current_run.store(ordinal, Ordering::SeqCst);
    }

    pub fn current_run(&self) -> u64 {
        self.current_run.load(Ordering::SeqCst)
    }

    /// Append a sample for the active run.
    pub fn record(&self, kind: MetricKind, value_ns: u64) {
        let sample = MetricSample::new(kind, value_ns, self.current_run());
        self.lock().push(sample);
        self.recorded.notify_waiters();
    }

    /// Number of buffered samples of `kind` stamped with `run`.
    pub fn count(&self, kind: &MetricKind, run: u64) -> usize {
        self.lock()
            .iter()
            .filter(|s| s.run == run && &s.kind == kind)
            .count()
    }

    /// Resolve once at least `expected` samples of `kind` are buffered for `run`.
    pub async fn wait_for_count(&self, kind: &MetricKind, run: u64, expected: usize) {
        loop {
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent record is not missed.
            notified.as_mut().enable();
            if self.count(kind, run) >= expected {
                return;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the buffered samples in arrival order.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        self.lock().clone()
    }

    /// Take every buffered sample, leaving the buffer empty.
    pub fn drain(&self) -> Vec<MetricSample> {
        std::mem::take(&mut *self.lock())
    }
}

/// Cross-task state for one harness session.
#[derive(Debug, Default)]
pub struct SessionState {
    checker_ready: ReadinessFlag,
    manager_ready: ReadinessFlag,
    samples: SampleBuffer,
    probe_error: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readiness flag for `role`.
    pub fn readiness(&self, role: WorkerRole) -> &ReadinessFlag {
        match role {
            WorkerRole::ComplianceChecker => &self.checker_ready,
            WorkerRole::DataManager => &self.manager_ready,
        }
    }

    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    /// Record that at least one probe failed this session.
    pub fn flag_probe_error(&self) {
        self.probe_error.store(true, Ordering::SeqCst);
    }

    pub fn probe_error_occurred(&self) -> bool {
        self.probe_error.load(Ordering::SeqCst)
    }
}
