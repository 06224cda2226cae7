//! Harness configuration.

use std::path::PathBuf;
use std::time::Duration;

use evalrun_core::{CoreError, ExperimentPlan, FailedProbePolicy, WorkerCommand};
use evalrun_harness::{CoordinatorConfig, ProbeAttributes, DEFAULT_ENDPOINT, DEFAULT_QUERY};

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Directory receiving the session log and exported tables.
    pub work_dir: PathBuf,

    /// Validation endpoint probed after each readiness signal.
    pub endpoint: String,

    /// Query sent with each probe; `{run}` is replaced with the probe index.
    pub query: String,

    /// Classification attributes sent with each probe.
    pub attributes: ProbeAttributes,

    /// Runtime executable both workers are launched with.
    pub runtime: String,

    /// Compliance checker artifact (persistent worker).
    pub checker_artifact: String,

    /// Data manager artifact (restarted per run).
    pub manager_artifact: String,

    /// Shell command run before any worker starts, if set.
    pub build_command: Option<String>,

    /// Readiness timeout. `None` waits indefinitely.
    pub readiness_timeout: Option<Duration>,

    /// Liveness poll interval while waiting for readiness.
    pub poll_interval: Duration,

    /// Discarded probes per run.
    pub warmup_probes: u32,

    /// Measured probes per run.
    pub measured_probes: u32,

    /// How failed probes enter the mean.
    pub failed_probe_policy: FailedProbePolicy,

    /// Longest wait after probing for a run's timing samples.
    pub sample_settle: Duration,

    /// Studies to run.
    pub plan: ExperimentPlan,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("tmp"),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            query: DEFAULT_QUERY.to_string(),
            attributes: ProbeAttributes::default(),
            runtime: "java".to_string(),
            checker_artifact: "compliance-checker/build/libs/compliance-checker-0.1-SNAPSHOT.jar"
                .to_string(),
            manager_artifact: "data-manager/build/libs/data-manager-0.1-SNAPSHOT.jar".to_string(),
            build_command: Some("./gradlew build".to_string()),
            readiness_timeout: None,
            poll_interval: Duration::from_secs(1),
            warmup_probes: 1,
            measured_probes: 5,
            failed_probe_policy: FailedProbePolicy::ZeroFill,
            sample_settle: Duration::from_secs(2),
            plan: ExperimentPlan::default(),
        }
    }
}

impl HarnessConfig {
    /// Reject settings that cannot produce a meaningful result.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.measured_probes == 0 {
            return Err(CoreError::InvalidPlan(
                "at least one measured probe per run is required".into(),
            ));
        }
        self.plan.validate()
    }

    pub fn checker_command(&self) -> WorkerCommand {
        WorkerCommand::jar(&self.runtime, &self.checker_artifact)
    }

    /// Template for data manager launches; run options are filled in per run.
    pub fn manager_command(&self) -> WorkerCommand {
        WorkerCommand::jar(&self.runtime, &self.manager_artifact)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            warmup_probes: self.warmup_probes,
            measured_probes: self.measured_probes,
            poll_interval: self.poll_interval,
            readiness_timeout: self.readiness_timeout,
            failed_probe_policy: self.failed_probe_policy,
            sample_settle: self.sample_settle,
        }
    }
}
