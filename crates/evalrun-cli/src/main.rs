//! evalrun - processing-time evaluation harness.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use evalrun_core::{ExperimentPlan, FailedProbePolicy, SignalExtractor, WorkerRole};
use evalrun_harness::{
    ExperimentCoordinator, Exporter, HttpProbe, LogSink, ProbeAttributes, ProcessSupervisor,
    SessionState, SweepDriver,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod shutdown;

use config::HarnessConfig;
use shutdown::wait_for_shutdown_signal;

/// Run processing-time experiments against the compliance checker.
#[derive(Parser, Debug)]
#[command(name = "evalrun", about = "Processing-time evaluation harness")]
struct Cli {
    /// Directory for the session log and exported tables
    #[arg(long, default_value = "tmp")]
    work_dir: PathBuf,

    /// JSON experiment plan (defaults to the built-in processing-time studies)
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Validation endpoint of the compliance checker
    #[arg(long)]
    endpoint: Option<String>,

    /// Query sent with each probe; `{run}` is replaced with the probe index
    #[arg(long)]
    query: Option<String>,

    /// Purpose attribute sent with each probe (repeatable)
    #[arg(long)]
    purpose: Vec<String>,

    /// Role attribute sent with each probe (repeatable)
    #[arg(long)]
    role: Vec<String>,

    /// Runtime used to launch both workers
    #[arg(long)]
    runtime: Option<String>,

    /// Compliance checker jar
    #[arg(long)]
    checker_artifact: Option<String>,

    /// Data manager jar
    #[arg(long)]
    manager_artifact: Option<String>,

    /// Give up on a data manager that is not ready after this many seconds
    #[arg(long)]
    readiness_timeout_secs: Option<u64>,

    /// Liveness poll interval while waiting for readiness
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Discarded probes per run
    #[arg(long, default_value = "1")]
    warmup_probes: u32,

    /// Measured probes per run
    #[arg(long, default_value = "5")]
    measured_probes: u32,

    /// Longest wait after probing for a run's timing samples
    #[arg(long, default_value = "2000")]
    sample_settle_ms: u64,

    /// Leave failed probes out of the mean instead of counting them as zero
    #[arg(long)]
    exclude_failed_probes: bool,

    /// Skip the build step before starting workers
    #[arg(short, long)]
    skip_build: bool,

    /// Build command run before starting workers
    #[arg(long)]
    build_command: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
        let defaults = HarnessConfig::default();

        let plan = match &self.plan {
            Some(path) => ExperimentPlan::from_json(&std::fs::read_to_string(path)?)?,
            None => defaults.plan,
        };
        let attributes = ProbeAttributes {
            purpose: if self.purpose.is_empty() {
                defaults.attributes.purpose
            } else {
                self.purpose
            },
            role: if self.role.is_empty() {
                defaults.attributes.role
            } else {
                self.role
            },
        };
        let build_command = if self.skip_build {
            None
        } else {
            self.build_command.or(defaults.build_command)
        };

        Ok(HarnessConfig {
            work_dir: self.work_dir,
            endpoint: self.endpoint.unwrap_or(defaults.endpoint),
            query: self.query.unwrap_or(defaults.query),
            attributes,
            runtime: self.runtime.unwrap_or(defaults.runtime),
            checker_artifact: self.checker_artifact.unwrap_or(defaults.checker_artifact),
            manager_artifact: self.manager_artifact.unwrap_or(defaults.manager_artifact),
            build_command,
            readiness_timeout: self.readiness_timeout_secs.map(Duration::from_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            warmup_probes: self.warmup_probes,
            measured_probes: self.measured_probes,
            failed_probe_policy: if self.exclude_failed_probes {
                FailedProbePolicy::Exclude
            } else {
                FailedProbePolicy::ZeroFill
            },
            sample_settle: Duration::from_millis(self.sample_settle_ms),
            plan,
        })
    }
}

/// Run the build command through the shell, failing on a non-zero exit.
async fn run_build(command: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!(command, "Building");
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .await?;
    if !status.success() {
        return Err(format!("build command '{}' failed with {}", command, status).into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Diagnostics go to stderr; stdout carries the session log.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evalrun=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config()?;
    config.validate()?;

    if let Some(command) = &config.build_command {
        run_build(command).await?;
    }

    let (sink, log_path) = LogSink::open_session(&config.work_dir).await?;
    info!(
        log = %log_path.display(),
        studies = config.plan.studies.len(),
        "Starting evaluation"
    );

    let extractor = SignalExtractor::default();
    let metric_kinds = extractor.metric_kinds();
    let mut supervisor = ProcessSupervisor::new(sink, extractor, Arc::new(SessionState::new()));

    let probe = HttpProbe::new(&config.endpoint)
        .with_query_template(&config.query)
        .with_attributes(config.attributes.clone());
    let mut coordinator = ExperimentCoordinator::new(
        WorkerRole::DataManager,
        config.manager_command(),
        Arc::new(probe),
        config.coordinator_config(),
    )
    .with_expected_metrics(metric_kinds.clone());

    let plan = config.plan.clone();
    let checker = config.checker_command();
    let sweep = async {
        let exporter = Exporter::create(&config.work_dir)?;
        supervisor.start(WorkerRole::ComplianceChecker, &checker)?;
        SweepDriver::new(plan, exporter, metric_kinds)
            .run(&mut supervisor, &mut coordinator)
            .await
    };
    let interrupted = async {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Signal handler failed; interrupts will not stop workers cleanly");
            std::future::pending::<()>().await;
        }
    };

    let outcome = tokio::select! {
        result = sweep => result.map(Some),
        _ = interrupted => {
            warn!("Interrupted, stopping workers");
            Ok(None)
        }
    };

    let lines = supervisor.shutdown().await;
    info!(lines, "Session log closed");

    match outcome {
        Ok(Some(studies)) => {
            for study in &studies {
                info!(study = %study.study, files = study.files.len(), "Study complete");
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            error!(error = %e, "Evaluation failed");
            Err(e.into())
        }
    }
}
