//! Experiment harness for evalrun
//!
//! This crate supervises the worker processes under evaluation, funnels their
//! output through one ordered session log, scrapes readiness and timing
//! signals from it, and drives parameter sweeps against the system.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use evalrun_core::{ExperimentPlan, SignalExtractor, WorkerCommand, WorkerRole};
//! use evalrun_harness::{
//!     CoordinatorConfig, ExperimentCoordinator, Exporter, HttpProbe, LogSink,
//!     ProcessSupervisor, SessionState, SweepDriver, DEFAULT_ENDPOINT,
//! };
//!
//! async fn evaluate() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, _log_path) = LogSink::open_session(Path::new("tmp")).await?;
//!     let extractor = SignalExtractor::default();
//!     let kinds = extractor.metric_kinds();
//!     let mut sup = ProcessSupervisor::new(sink, extractor, Arc::new(SessionState::new()));
//!
//!     sup.start(
//!         WorkerRole::ComplianceChecker,
//!         &WorkerCommand::jar("java", "compliance-checker.jar"),
//!     )?;
//!
//!     let mut coordinator = ExperimentCoordinator::new(
//!         WorkerRole::DataManager,
//!         WorkerCommand::jar("java", "data-manager.jar"),
//!         Arc::new(HttpProbe::new(DEFAULT_ENDPOINT)),
//!         CoordinatorConfig::default(),
//!     );
//!     let mut driver = SweepDriver::new(ExperimentPlan::default(), Exporter::create("tmp")?, kinds);
//!     driver.run(&mut sup, &mut coordinator).await?;
//!
//!     sup.shutdown().await;
//!     Ok(())
//! }
//! ```

mod coordinator;
mod error;
mod export;
mod probe;
mod reader;
mod sink;
mod state;
mod supervisor;
mod sweep;

// Re-export main types
pub use coordinator::{CoordinatorConfig, ExperimentCoordinator};
pub use error::HarnessError;
pub use export::{Exporter, RUNS_FILE};
pub use probe::{HttpProbe, Probe, ProbeAttributes, ProbeResponse, DEFAULT_ENDPOINT, DEFAULT_QUERY};
pub use reader::{lines, merged_lines, LineStream, StreamReader};
pub use sink::{LogSink, SinkHandle, SinkTarget, HARNESS_TAG};
pub use state::{ReadinessFlag, SampleBuffer, SessionState};
pub use supervisor::{ProcessSupervisor, WorkerHandle, DEFAULT_SHUTDOWN_GRACE};
pub use sweep::{StudyOutcome, SweepDriver};
