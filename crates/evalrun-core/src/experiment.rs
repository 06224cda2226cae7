//! Experiment plans, sweep axes and run results.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::CoreError;

/// Outcome of one probe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// HTTP status, or `None` if the request never got a response.
    pub status: Option<u16>,
    /// Wall-clock round trip.
    pub elapsed: Duration,
}

impl ProbeRecord {
    pub fn new(status: Option<u16>, elapsed: Duration) -> Self {
        Self { status, elapsed }
    }

    /// Returns true for a 2xx response.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(code) if (200..300).contains(&code))
    }
}

/// How failed measured probes enter a run's mean latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedProbePolicy {
    /// A failed probe counts as zero duration but still divides the mean.
    ///
    /// Skews the mean downwards; kept as the default so results stay
    /// comparable with earlier evaluation runs.
    #[default]
    ZeroFill,
    /// Failed probes are left out of the mean entirely.
    Exclude,
}

impl FailedProbePolicy {
    /// Mean latency in seconds over `probes`. Empty input yields 0.
    pub fn mean_secs(&self, probes: &[ProbeRecord]) -> f64 {
        let successes = probes.iter().filter(|p| p.is_success());
        let total: f64 = successes.clone().map(|p| p.elapsed.as_secs_f64()).sum();
        let count = match self {
            Self::ZeroFill => probes.len(),
            Self::Exclude => successes.count(),
        };
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }
}

/// Result of one experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Session-wide ordinal of the run; samples carry the same number.
    pub ordinal: u64,
    /// Human-readable run name, e.g. `exp-npol100-ncon10`.
    pub name: String,
    /// Mean latency over the measured probes, in seconds.
    pub mean_secs: f64,
    /// True if every measured probe succeeded.
    pub success: bool,
    /// Measured probes in issue order (warm-up excluded).
    pub probes: Vec<ProbeRecord>,
}

impl ExperimentResult {
    /// Summarise measured probes under `policy`.
    pub fn from_probes(
        ordinal: u64,
        name: impl Into<String>,
        probes: Vec<ProbeRecord>,
        policy: FailedProbePolicy,
    ) -> Self {
        Self {
            ordinal,
            name: name.into(),
            mean_secs: policy.mean_secs(&probes),
            success: probes.iter().all(ProbeRecord::is_success),
            probes,
        }
    }
}

/// One dimension of a parameter grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepAxis {
    /// Worker option key, e.g. `-Ddatamanager.generatedata.npoliciespertag`.
    pub key: String,
    /// Short label used in run names, e.g. `npol`.
    pub short: String,
    /// Values in sweep order.
    pub values: Vec<u64>,
}

impl SweepAxis {
    pub fn new(key: impl Into<String>, short: impl Into<String>, values: Vec<u64>) -> Self {
        Self {
            key: key.into(),
            short: short.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A named worker option with its baseline value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanParameter {
    pub key: String,
    pub value: u64,
}

impl PlanParameter {
    pub fn new(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A sweep over one or two axes whose results are exported together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    /// Study name; also the stem of its export files.
    pub name: String,
    /// Outer axis; becomes the table columns.
    pub columns: SweepAxis,
    /// Optional inner axis; becomes the table rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<SweepAxis>,
}

/// One cell of a study's grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPoint {
    /// Run name derived from the axis values.
    pub name: String,
    /// Row index into the result matrix (0 for single-axis studies).
    pub row: usize,
    /// Column index into the result matrix.
    pub column: usize,
    /// Axis values overriding the baseline, outer axis first.
    pub overrides: Vec<(String, u64)>,
}

impl Study {
    /// Number of matrix rows.
    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map_or(1, SweepAxis::len)
    }

    /// Number of matrix columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Grid points in sweep order: outer axis slowest, inner axis fastest.
    pub fn points(&self, run_prefix: &str) -> Vec<GridPoint> {
        let mut points = Vec::with_capacity(self.row_count() * self.column_count());
        for (column, &outer) in self.columns.values.iter().enumerate() {
            let outer_name = format!("{}-{}{}", run_prefix, self.columns.short, outer);
            match &self.rows {
                None => points.push(GridPoint {
                    name: outer_name,
                    row: 0,
                    column,
                    overrides: vec![(self.columns.key.clone(), outer)],
                }),
                Some(rows) => {
                    for (row, &inner) in rows.values.iter().enumerate() {
                        points.push(GridPoint {
                            name: format!("{}-{}{}", outer_name, rows.short, inner),
                            row,
                            column,
                            overrides: vec![
                                (self.columns.key.clone(), outer),
                                (rows.key.clone(), inner),
                            ],
                        });
                    }
                }
            }
        }
        points
    }
}

/// Everything the sweep driver needs to know about the experiments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentPlan {
    /// Prefix of every run name.
    #[serde(default = "default_run_prefix")]
    pub run_prefix: String,
    /// Options passed unchanged to every restartable worker launch.
    #[serde(default)]
    pub fixed_options: Vec<String>,
    /// Parameters with their baseline values; axes override these.
    #[serde(default)]
    pub baseline: Vec<PlanParameter>,
    /// Studies run in order.
    pub studies: Vec<Study>,
}

fn default_run_prefix() -> String {
    "exp".to_string()
}

const NPOLICIES: &str = "-Ddatamanager.generatedata.npoliciespertag";
const NSCHEMAS: &str = "-Ddatamanager.generatedata.nschemas";
const NCONTEXT: &str = "-Ddatamanager.generatedata.ncontextattrs";
const NREQUIREMENTS: &str = "-Ddatamanager.generatedata.nrequirementattrs";

impl Default for ExperimentPlan {
    /// Processing-time evaluation: policies against context attributes,
    /// policies against requirement attributes, and a large policy count sweep.
    fn default() -> Self {
        let policies = SweepAxis::new(NPOLICIES, "npol", (1..=10).map(|i| i * 100).collect());
        let attrs: Vec<u64> = (1..=5).map(|i| i * 10).collect();

        Self {
            run_prefix: default_run_prefix(),
            fixed_options: vec![
                "-Dspring.jpa.hibernate.ddl-auto=create".to_string(),
                "-Ddatamanager.usecasedata=false".to_string(),
                "-Ddatamanager.generatedata=false".to_string(),
                "-Ddatamanager.tpcwdata=true".to_string(),
            ],
            baseline: vec![
                PlanParameter::new(NPOLICIES, 100),
                PlanParameter::new(NSCHEMAS, 5),
                PlanParameter::new(NCONTEXT, 10),
                PlanParameter::new(NREQUIREMENTS, 10),
            ],
            studies: vec![
                Study {
                    name: "exp-npol-ncon".to_string(),
                    columns: policies.clone(),
                    rows: Some(SweepAxis::new(NCONTEXT, "ncon", attrs.clone())),
                },
                Study {
                    name: "exp-npol-nreq".to_string(),
                    columns: policies,
                    rows: Some(SweepAxis::new(NREQUIREMENTS, "nreq", attrs)),
                },
                Study {
                    name: "exp-npol".to_string(),
                    columns: SweepAxis::new(
                        NPOLICIES,
                        "npol",
                        (1..=10).map(|i| i * 500).collect(),
                    ),
                    rows: None,
                },
            ],
        }
    }
}

impl ExperimentPlan {
    /// Parse a plan from JSON.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let plan: Self =
            serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Reject plans that cannot produce a well-formed result table.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.studies.is_empty() {
            return Err(CoreError::InvalidPlan("plan has no studies".into()));
        }

        let mut names = HashSet::new();
        for study in &self.studies {
            if !names.insert(study.name.as_str()) {
                return Err(CoreError::InvalidPlan(format!(
                    "duplicate study name '{}'",
                    study.name
                )));
            }
            let axes = std::iter::once(&study.columns).chain(study.rows.iter());
            for axis in axes {
                if axis.is_empty() {
                    return Err(CoreError::InvalidPlan(format!(
                        "study '{}' has an empty axis '{}'",
                        study.name, axis.short
                    )));
                }
            }
        }
        Ok(())
    }

    /// Launch options for a grid point: fixed options, then the baseline
    /// overlaid with the point's axis values, rendered as `key=value`.
    pub fn options_for(&self, point: &GridPoint) -> Vec<String> {
        let lookup = |key: &str| {
            point
                .overrides
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| *v)
        };

        let mut options = self.fixed_options.clone();
        for param in &self.baseline {
            let value = lookup(&param.key).unwrap_or(param.value);
            options.push(format!("{}={}", param.key, value));
        }
        for (key, value) in &point.overrides {
            if !self.baseline.iter().any(|p| &p.key == key) {
                options.push(format!("{}={}", key, value));
            }
        }
        options
    }
}
