//! Error types for the evaluation harness.

use std::time::Duration;

use evalrun_core::{CoreError, WorkerRole};
use thiserror::Error;

/// Errors that can occur while supervising workers and running experiments.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Worker executable could not be started.
    #[error("Failed to launch {role} ('{program}'): {source}")]
    Launch {
        role: WorkerRole,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A restartable worker is already registered.
    #[error("A {0} is already running; tear it down before starting another")]
    RestartableAlreadyRunning(WorkerRole),

    /// Handle does not refer to a registered worker.
    #[error("Unknown worker handle: {0}")]
    UnknownWorker(u64),

    /// Worker did not print its readiness marker in time.
    #[error("{role} not ready after {waited:?}")]
    ReadinessTimeout { role: WorkerRole, waited: Duration },

    /// Worker exited before printing its readiness marker.
    #[error("{role} exited before becoming ready")]
    WorkerExited { role: WorkerRole },

    /// Probe request could not be built or sent.
    #[error("Probe error: {0}")]
    Probe(#[from] reqwest::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Domain error.
    #[error(transparent)]
    Core(#[from] CoreError),
}
