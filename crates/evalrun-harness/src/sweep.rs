//! Sweep driver: runs every study of a plan and exports its tables.

use std::path::PathBuf;

use evalrun_core::{aggregate_metric, ExperimentPlan, MetricKind, ResultTable, RunCell, Study};
use tracing::{debug, info};

use crate::coordinator::ExperimentCoordinator;
use crate::error::HarnessError;
use crate::export::Exporter;
use crate::supervisor::ProcessSupervisor;

/// Tables produced by one study.
#[derive(Debug, Clone)]
pub struct StudyOutcome {
    pub study: String,
    /// Mean probe latency per grid point, in seconds.
    pub latency: ResultTable,
    /// One table per metric kind, in the extractor's rule order.
    pub metrics: Vec<(MetricKind, ResultTable)>,
    /// Files written for this study.
    pub files: Vec<PathBuf>,
}

/// Walks an [`ExperimentPlan`] study by study.
pub struct SweepDriver {
    plan: ExperimentPlan,
    exporter: Exporter,
    metric_kinds: Vec<MetricKind>,
}

impl SweepDriver {
    pub fn new(plan: ExperimentPlan, exporter: Exporter, metric_kinds: Vec<MetricKind>) -> Self {
        Self {
            plan,
            exporter,
            metric_kinds,
        }
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    /// Run every study in order. The first fatal error stops the sweep.
    pub async fn run(
        &mut self,
        sup: &mut ProcessSupervisor,
        coordinator: &mut ExperimentCoordinator,
    ) -> Result<Vec<StudyOutcome>, HarnessError> {
        let studies = self.plan.studies.clone();
        let mut outcomes = Vec::with_capacity(studies.len());
        for study in &studies {
            outcomes.push(self.run_study(sup, coordinator, study).await?);
        }
        info!(studies = outcomes.len(), "Sweep complete");
        Ok(outcomes)
    }

    async fn run_study(
        &mut self,
        sup: &mut ProcessSupervisor,
        coordinator: &mut ExperimentCoordinator,
        study: &Study,
    ) -> Result<StudyOutcome, HarnessError> {
        let points = study.points(&self.plan.run_prefix);
        info!(study = %study.name, runs = points.len(), "Starting study");

        let stray = sup.state().samples().drain();
        if !stray.is_empty() {
            debug!(study = %study.name, samples = stray.len(), "Discarding samples from before the study");
        }

        let mut latency = ResultTable::for_study(study);
        let mut runs = Vec::with_capacity(points.len());
        for point in &points {
            let options = self.plan.options_for(point);
            let result = coordinator.run(sup, &point.name, options).await?;

            latency.set(point.row, point.column, result.mean_secs);
            self.exporter.append_run(&result)?;
            runs.push(RunCell {
                row: point.row,
                column: point.column,
                ordinal: result.ordinal,
            });
        }

        let samples = sup.state().samples().drain();
        let warmup = coordinator.config().warmup_probes as usize;

        let mut files = vec![self.exporter.write_table(&study.name, &latency)?];
        let mut metrics = Vec::with_capacity(self.metric_kinds.len());
        for kind in &self.metric_kinds {
            let table = aggregate_metric(study, &runs, &samples, kind, warmup);
            let stem = format!("{}-{}", study.name, kind);
            files.push(self.exporter.write_table(&stem, &table)?);
            metrics.push((kind.clone(), table));
        }

        info!(study = %study.name, samples = samples.len(), "Study exported");
        Ok(StudyOutcome {
            study: study.name.clone(),
            latency,
            metrics,
            files,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use crate::probe::{Probe, ProbeResponse};
    use crate::sink::LogSink;
    use crate::state::SessionState;
    use async_trait::async_trait;
    use evalrun_core::{SignalExtractor, SweepAxis, WorkerCommand, WorkerRole};
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use std::time::Duration;

    /// Always succeeds after 10ms.
    struct FixedProbe;

    #[async_trait]
    impl Probe for FixedProbe {
        async fn send(&self, _run: u64) -> Result<ProbeResponse, HarnessError> {
            Ok(ProbeResponse {
                status: 200,
                body: String::new(),
                elapsed: Duration::from_millis(10),
            })
        }
    }

    /// Fake worker that echoes its arguments and reports ready.
    fn worker_script(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("worker.sh");
        std::fs::write(&path, "#!/bin/sh\necho \"args: $*\"\necho Finished preloading\nexec sleep 30\n")
            .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn plan() -> ExperimentPlan {
        ExperimentPlan {
            run_prefix: "exp".to_string(),
            fixed_options: vec!["-Dfixed=true".to_string()],
            baseline: vec![
                evalrun_core::PlanParameter::new("-Da", 1),
                evalrun_core::PlanParameter::new("-Db", 1),
            ],
            studies: vec![Study {
                name: "exp-a-b".to_string(),
                columns: SweepAxis::new("-Da", "a", vec![1, 2]),
                rows: Some(SweepAxis::new("-Db", "b", vec![10, 20])),
            }],
        }
    }

    #[tokio::test]
    async fn test_sweep_fills_table_and_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("session.log");
        let script = worker_script(dir.path());

        let mut sup = ProcessSupervisor::new(
            LogSink::spawn(vec![Box::new(tokio::fs::File::create(&log).await.unwrap())]),
            SignalExtractor::default(),
            Arc::new(SessionState::new()),
        );
        let mut coordinator = ExperimentCoordinator::new(
            WorkerRole::DataManager,
            WorkerCommand::new(script.to_string_lossy()),
            Arc::new(FixedProbe),
            CoordinatorConfig {
                poll_interval: Duration::from_millis(50),
                readiness_timeout: Some(Duration::from_secs(10)),
                ..CoordinatorConfig::default()
            },
        );
        let exporter = Exporter::create(dir.path().join("out")).unwrap();
        let kinds = SignalExtractor::default().metric_kinds();
        let mut driver = SweepDriver::new(plan(), exporter, kinds);

        let outcomes = driver.run(&mut sup, &mut coordinator).await.unwrap();
        assert_eq!(driver.exporter().runs_written(), 4);
        sup.shutdown().await;

        let outcome = &outcomes[0];
        assert!(outcome.latency.cells.iter().all(|c| (c - 0.010).abs() < 1e-9));
        // No checker ran, so the metric tables have no samples.
        assert!(outcome.metrics.iter().all(|(_, t)| t.cells.iter().all(|c| c.is_nan())));

        let names: Vec<String> = outcome
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["exp-a-b.csv", "exp-a-b-matching.csv", "exp-a-b-get-policies.csv"]
        );

        let runs = std::fs::read_to_string(dir.path().join("out/runs.csv")).unwrap();
        let run_names: Vec<&str> = runs
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(
            run_names,
            vec!["exp-a1-b10", "exp-a1-b20", "exp-a2-b10", "exp-a2-b20"]
        );

        let log = tokio::fs::read_to_string(&log).await.unwrap();
        assert!(log.contains("DM  | args: -Dfixed=true -Da=2 -Db=20"));
    }

    #[tokio::test]
    async fn test_launch_failure_stops_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = ProcessSupervisor::new(
            LogSink::spawn(Vec::new()),
            SignalExtractor::default(),
            Arc::new(SessionState::new()),
        );
        let mut coordinator = ExperimentCoordinator::new(
            WorkerRole::DataManager,
            WorkerCommand::new("/nonexistent/java"),
            Arc::new(FixedProbe),
            CoordinatorConfig::default(),
        );
        let mut driver = SweepDriver::new(plan(), Exporter::create(dir.path()).unwrap(), Vec::new());

        let err = driver.run(&mut sup, &mut coordinator).await.unwrap_err();
        assert!(matches!(err, HarnessError::Launch { .. }));
        assert_eq!(driver.exporter().runs_written(), 0);
        sup.shutdown().await;
    }
}
