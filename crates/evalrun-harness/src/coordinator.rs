//! Experiment coordinator: one run per call.
//!
//! A run starts a fresh restartable worker, waits for its readiness marker,
//! issues the warm-up and measured probes, then tears the worker down and
//! joins its reader before returning, so nothing from one run lingers into
//! the next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use evalrun_core::{
    ExperimentResult, FailedProbePolicy, MetricKind, ProbeRecord, RunPhase, WorkerCommand,
    WorkerRole,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::probe::Probe;
use crate::sink::SinkHandle;
use crate::state::SessionState;
use crate::supervisor::{ProcessSupervisor, WorkerHandle};

/// Tunables for a single experiment run.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Probes issued and discarded before measuring.
    pub warmup_probes: u32,
    /// Probes measured per run.
    pub measured_probes: u32,
    /// How often worker liveness is checked while waiting for readiness.
    pub poll_interval: Duration,
    /// Give up waiting for readiness after this long. `None` waits forever.
    pub readiness_timeout: Option<Duration>,
    /// How failed measured probes enter the mean.
    pub failed_probe_policy: FailedProbePolicy,
    /// Longest wait after probing for the run's timing samples to arrive.
    pub sample_settle: Duration,
}

/// Shortest liveness poll interval; a zero interval would never yield.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            warmup_probes: 1,
            measured_probes: 5,
            poll_interval: Duration::from_secs(1),
            readiness_timeout: None,
            failed_probe_policy: FailedProbePolicy::ZeroFill,
            sample_settle: Duration::from_secs(2),
        }
    }
}

/// Drives the per-run state machine for the restartable worker.
pub struct ExperimentCoordinator {
    role: WorkerRole,
    template: WorkerCommand,
    probe: Arc<dyn Probe>,
    config: CoordinatorConfig,
    expected_metrics: Vec<MetricKind>,
    phase: RunPhase,
    next_ordinal: u64,
}

impl ExperimentCoordinator {
    /// Create a coordinator restarting `role` from `template` for every run.
    ///
    /// Run-specific options replace the template's options.
    pub fn new(
        role: WorkerRole,
        template: WorkerCommand,
        probe: Arc<dyn Probe>,
        mut config: CoordinatorConfig,
    ) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            role,
            template,
            probe,
            config,
            expected_metrics: Vec::new(),
            phase: RunPhase::Idle,
            next_ordinal: 0,
        }
    }

    /// Builder method to wait, before teardown, for one sample of each kind
    /// per probe (warm-up included).
    ///
    /// Samples are attributed to the run active when their line arrives, so a
    /// lagging worker would otherwise leak samples into the next run.
    pub fn with_expected_metrics(mut self, kinds: Vec<MetricKind>) -> Self {
        self.expected_metrics = kinds;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn advance(&mut self, next: RunPhase) -> Result<(), HarnessError> {
        debug!(from = ?self.phase, to = ?next, "Run phase");
        self.phase.advance(next)?;
        Ok(())
    }

    /// Execute one experiment run named `name` with the given worker options.
    pub async fn run(
        &mut self,
        sup: &mut ProcessSupervisor,
        name: &str,
        options: Vec<String>,
    ) -> Result<ExperimentResult, HarnessError> {
        let sink = sup.sink();
        let state = sup.state().clone();
        sink.note(format!("----- Starting experiment {} -----", name));

        self.advance(RunPhase::WorkerStarting)?;
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        state.readiness(self.role).clear();
        state.samples().begin_run(ordinal);

        let command = self.template.clone().with_options(options);
        let handle = match sup.start(self.role, &command) {
            Ok(handle) => handle,
            Err(e) => {
                self.advance(RunPhase::TearingDown)?;
                self.advance(RunPhase::Idle)?;
                return Err(e);
            }
        };

        self.advance(RunPhase::AwaitingReadiness)?;
        let started = Instant::now();
        if let Err(e) = self.await_readiness(sup, handle, &state).await {
            warn!(run = %name, error = %e, "Worker never became ready");
            sink.note(format!("ERROR: {}", e));
            self.advance(RunPhase::TearingDown)?;
            self.tear_down(sup, handle, &state).await?;
            self.advance(RunPhase::Idle)?;
            return Err(e);
        }
        info!(run = %name, ready_after = ?started.elapsed(), "Worker ready, probing");

        self.advance(RunPhase::Probing)?;
        let probes = self.probe_all(&state, &sink).await;
        self.await_samples(&state, ordinal).await;

        self.advance(RunPhase::TearingDown)?;
        sink.note(format!(
            "Done with experiment, terminating this {}...",
            self.role
        ));
        self.tear_down(sup, handle, &state).await?;
        self.advance(RunPhase::Idle)?;

        let result = ExperimentResult::from_probes(
            ordinal,
            name,
            probes,
            self.config.failed_probe_policy,
        );
        info!(
            run = %name,
            ordinal,
            mean_secs = result.mean_secs,
            success = result.success,
            "Experiment finished"
        );
        Ok(result)
    }

    async fn await_readiness(
        &self,
        sup: &mut ProcessSupervisor,
        handle: WorkerHandle,
        state: &SessionState,
    ) -> Result<(), HarnessError> {
        let role = self.role;
        let flag = state.readiness(role);
        let poll_interval = self.config.poll_interval;

        let wait = async {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = flag.wait() => return Ok::<(), HarnessError>(()),
                    _ = ticker.tick() => {
                        if sup.is_alive(handle)? {
                            continue;
                        }
                        // The reader may still be behind the exit.
                        return match tokio::time::timeout(poll_interval, flag.wait()).await {
                            Ok(()) => Ok(()),
                            Err(_) => Err(HarnessError::WorkerExited { role }),
                        };
                    }
                }
            }
        };

        match self.config.readiness_timeout {
            None => wait.await,
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(HarnessError::ReadinessTimeout {
                    role,
                    waited: limit,
                })),
        }
    }

    async fn await_samples(&self, state: &SessionState, ordinal: u64) {
        if self.expected_metrics.is_empty() {
            return;
        }
        let expected = (self.config.warmup_probes + self.config.measured_probes) as usize;
        let samples = state.samples();
        let all = async {
            for kind in &self.expected_metrics {
                samples.wait_for_count(kind, ordinal, expected).await;
            }
        };
        if tokio::time::timeout(self.config.sample_settle, all).await.is_err() {
            for kind in &self.expected_metrics {
                warn!(
                    kind = %kind,
                    ordinal,
                    seen = samples.count(kind, ordinal),
                    expected,
                    "Timing samples still missing after settle time"
                );
            }
        }
    }

    async fn probe_all(&self, state: &SessionState, sink: &SinkHandle) -> Vec<ProbeRecord> {
        for run in 0..self.config.warmup_probes {
            let warmup = self.probe_once(u64::from(run), state, sink).await;
            debug!(status = ?warmup.status, "Warm-up probe discarded");
        }

        let mut measured = Vec::with_capacity(self.config.measured_probes as usize);
        for run in 0..self.config.measured_probes {
            measured.push(self.probe_once(u64::from(run), state, sink).await);
        }
        measured
    }

    async fn probe_once(&self, run: u64, state: &SessionState, sink: &SinkHandle) -> ProbeRecord {
        match self.probe.send(run).await {
            Ok(response) if response.is_success() => {
                ProbeRecord::new(Some(response.status), response.elapsed)
            }
            Ok(response) => {
                state.flag_probe_error();
                warn!(status = response.status, run, "Probe returned non-success status");
                sink.note(format!(
                    "ERROR: {}: {}",
                    response.status,
                    response.body.trim()
                ));
                ProbeRecord::new(Some(response.status), response.elapsed)
            }
            Err(e) => {
                state.flag_probe_error();
                warn!(error = %e, run, "Probe failed");
                sink.note(format!("ERROR: {}", e));
                ProbeRecord::new(None, Duration::ZERO)
            }
        }
    }

    async fn tear_down(
        &self,
        sup: &mut ProcessSupervisor,
        handle: WorkerHandle,
        state: &SessionState,
    ) -> Result<(), HarnessError> {
        sup.terminate(handle)?;
        let lines = sup.retire(handle).await?;
        state.readiness(self.role).clear();
        debug!(role = %self.role, lines, "Worker torn down");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probe::ProbeResponse;
    use crate::sink::LogSink;
    use async_trait::async_trait;
    use evalrun_core::SignalExtractor;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies with pre-set status codes, each taking 10ms.
    struct ScriptedProbe {
        statuses: Mutex<VecDeque<u16>>,
        sent: Mutex<Vec<u64>>,
    }

    impl ScriptedProbe {
        fn new(statuses: &[u16]) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn send(&self, run: u64) -> Result<ProbeResponse, HarnessError> {
            self.sent.lock().unwrap().push(run);
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
            Ok(ProbeResponse {
                status,
                body: "scripted".to_string(),
                elapsed: Duration::from_millis(10),
            })
        }
    }

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(
            LogSink::spawn(Vec::new()),
            SignalExtractor::default(),
            Arc::new(SessionState::new()),
        )
        .with_shutdown_grace(Duration::from_secs(5))
    }

    fn coordinator(script: &str, probe: Arc<dyn Probe>, config: CoordinatorConfig) -> ExperimentCoordinator {
        ExperimentCoordinator::new(
            WorkerRole::DataManager,
            WorkerCommand::new("sh").with_artifact(["-c", script]),
            probe,
            config,
        )
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: Duration::from_millis(50),
            readiness_timeout: Some(Duration::from_secs(10)),
            ..CoordinatorConfig::default()
        }
    }

    const READY_WORKER: &str = "echo Finished preloading; exec sleep 30";

    #[tokio::test]
    async fn test_failed_probe_counts_as_zero_and_flags_error() {
        let mut sup = supervisor();
        let probe = ScriptedProbe::new(&[200, 200, 500, 200, 200, 200]);
        let mut coord = coordinator(READY_WORKER, probe.clone(), fast_config());

        let result = coord.run(&mut sup, "exp-b", Vec::new()).await.unwrap();

        assert_eq!(result.probes.len(), 5);
        assert_eq!(result.probes[1].status, Some(500));
        assert!((result.mean_secs - 0.008).abs() < 1e-9);
        assert!(!result.success);
        assert!(sup.state().probe_error_occurred());
        assert_eq!(*probe.sent.lock().unwrap(), vec![0, 0, 1, 2, 3, 4]);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_exclude_policy_ignores_failed_probe() {
        let mut sup = supervisor();
        let probe = ScriptedProbe::new(&[200, 200, 500, 200, 200, 200]);
        let config = CoordinatorConfig {
            failed_probe_policy: FailedProbePolicy::Exclude,
            ..fast_config()
        };
        let mut coord = coordinator(READY_WORKER, probe, config);

        let result = coord.run(&mut sup, "exp-b", Vec::new()).await.unwrap();
        assert!((result.mean_secs - 0.010).abs() < 1e-9);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_back_to_back_runs_start_clean() {
        let mut sup = supervisor();
        let mut coord = coordinator(READY_WORKER, ScriptedProbe::new(&[]), fast_config());

        let first = coord.run(&mut sup, "exp-1", Vec::new()).await.unwrap();
        assert!(!sup.state().readiness(WorkerRole::DataManager).is_set());
        assert!(sup.registered().is_empty());
        assert_eq!(coord.phase(), RunPhase::Idle);

        let second = coord.run(&mut sup, "exp-2", Vec::new()).await.unwrap();
        assert_eq!((first.ordinal, second.ordinal), (0, 1));
        assert!(second.success);
        assert!(!sup.state().probe_error_occurred());
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_readiness_timeout_tears_worker_down() {
        let mut sup = supervisor();
        let config = CoordinatorConfig {
            readiness_timeout: Some(Duration::from_millis(300)),
            ..fast_config()
        };
        let mut coord = coordinator("exec sleep 30", ScriptedProbe::new(&[]), config);

        let err = coord.run(&mut sup, "exp-hang", Vec::new()).await.unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { .. }));
        assert!(sup.registered().is_empty());
        assert_eq!(coord.phase(), RunPhase::Idle);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_exit_before_ready() {
        let mut sup = supervisor();
        let mut coord = coordinator("echo loading failed", ScriptedProbe::new(&[]), fast_config());

        let err = coord.run(&mut sup, "exp-dead", Vec::new()).await.unwrap_err();
        assert!(matches!(err, HarnessError::WorkerExited { .. }));
        assert!(sup.registered().is_empty());
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_clamped() {
        let mut sup = supervisor();
        let config = CoordinatorConfig {
            poll_interval: Duration::ZERO,
            ..fast_config()
        };
        let mut coord = coordinator(READY_WORKER, ScriptedProbe::new(&[]), config);
        assert_eq!(coord.config().poll_interval, MIN_POLL_INTERVAL);

        let result = coord.run(&mut sup, "exp-fast", Vec::new()).await.unwrap();
        assert!(result.success);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_launch_failure_is_returned() {
        let mut sup = supervisor();
        let mut coord = ExperimentCoordinator::new(
            WorkerRole::DataManager,
            WorkerCommand::new("/nonexistent/java"),
            ScriptedProbe::new(&[]),
            fast_config(),
        );

        let err = coord.run(&mut sup, "exp-x", Vec::new()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Launch { .. }));
        assert_eq!(coord.phase(), RunPhase::Idle);
        sup.shutdown().await;
    }
}
