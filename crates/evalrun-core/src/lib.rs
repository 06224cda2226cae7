//! evalrun core domain types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Process spawning
//! - Network
//! - Runtime specifics
//!
//! Everything here can be unit tested without launching a worker.

pub mod aggregate;
pub mod error;
pub mod experiment;
pub mod line;
pub mod metric;
pub mod signal;
pub mod status;
pub mod tags;
pub mod worker;

// Re-export commonly used types
pub use aggregate::{aggregate_metric, mean_after_warmup, ResultTable, RunCell};
pub use error::{CoreError, SignalParseError};
pub use experiment::{
    ExperimentPlan, ExperimentResult, FailedProbePolicy, GridPoint, PlanParameter, ProbeRecord,
    Study, SweepAxis,
};
pub use line::LogLine;
pub use metric::{MetricSample, NANOS_PER_SEC};
pub use signal::{Signal, SignalExtractor};
pub use status::{RunPhase, WorkerState};
pub use tags::{MetricKind, SourceTag, TAG_WIDTH};
pub use worker::{Lifecycle, WorkerCommand, WorkerRole};
