//! Structured signals scraped from free-text worker output.
//!
//! Workers are not instrumented for the harness; they only print log lines.
//! The [`SignalExtractor`] recognises two families of lines:
//!
//! - a readiness marker, a fixed phrase printed once a worker finished
//!   initialising (e.g. `Finished preloading`)
//! - stopwatch summary rows of the form `<nanos>  <ddd>%  <label>`, printed by
//!   the compliance checker for each validated request
//!
//! Extraction is pure: the caller decides what to do with the result.

use serde::{Deserialize, Serialize};

use crate::error::SignalParseError;
use crate::{MetricKind, WorkerRole};

/// Marker printed by the data manager once its dataset is loaded.
pub const PRELOAD_FINISHED_MARKER: &str = "Finished preloading";

/// Stopwatch label for policy matching and conflict resolution.
pub const POLICY_MATCHING_LABEL: &str = "policy matching and conflict resolution";

/// Stopwatch label for fetching candidate policies.
pub const GET_POLICIES_LABEL: &str = "get policies from db";

/// An event recognised in a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The role finished its initialisation phase.
    Ready(WorkerRole),
    /// A timing sample in nanoseconds.
    Sample { kind: MetricKind, value_ns: u64 },
}

/// Readiness marker owned by a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessRule {
    pub role: WorkerRole,
    pub marker: String,
}

/// Timing label owned by a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRule {
    pub role: WorkerRole,
    pub kind: MetricKind,
    pub label: String,
}

/// Recognises readiness and timing lines per source role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalExtractor {
    readiness: Vec<ReadinessRule>,
    metrics: Vec<MetricRule>,
}

impl Default for SignalExtractor {
    fn default() -> Self {
        Self::empty()
            .with_readiness(WorkerRole::DataManager, PRELOAD_FINISHED_MARKER)
            .with_metric(
                WorkerRole::ComplianceChecker,
                MetricKind::policy_matching(),
                POLICY_MATCHING_LABEL,
            )
            .with_metric(
                WorkerRole::ComplianceChecker,
                MetricKind::get_policies(),
                GET_POLICIES_LABEL,
            )
    }
}

impl SignalExtractor {
    /// An extractor that recognises nothing.
    pub fn empty() -> Self {
        Self {
            readiness: Vec::new(),
            metrics: Vec::new(),
        }
    }

    /// Builder method to add a readiness marker for a role.
    pub fn with_readiness(mut self, role: WorkerRole, marker: impl Into<String>) -> Self {
        self.readiness.push(ReadinessRule {
            role,
            marker: marker.into(),
        });
        self
    }

    /// Builder method to add a timing label for a role.
    pub fn with_metric(
        mut self,
        role: WorkerRole,
        kind: MetricKind,
        label: impl Into<String>,
    ) -> Self {
        self.metrics.push(MetricRule {
            role,
            kind,
            label: label.into(),
        });
        self
    }

    /// Metric kinds this extractor can produce, in rule order.
    pub fn metric_kinds(&self) -> Vec<MetricKind> {
        let mut kinds: Vec<MetricKind> = Vec::new();
        for rule in &self.metrics {
            if !kinds.contains(&rule.kind) {
                kinds.push(rule.kind.clone());
            }
        }
        kinds
    }

    /// Inspect one line produced by `role`.
    pub fn extract(&self, role: WorkerRole, line: &str) -> Vec<Result<Signal, SignalParseError>> {
        let mut out = Vec::new();

        for rule in self.readiness.iter().filter(|r| r.role == role) {
            if line.contains(rule.marker.as_str()) {
                out.push(Ok(Signal::Ready(role)));
            }
        }

        for rule in self.metrics.iter().filter(|r| r.role == role) {
            let Some(pos) = line.find(rule.label.as_str()) else {
                continue;
            };
            let parsed = parse_stopwatch_value(&line[..pos]).ok_or_else(|| SignalParseError {
                label: rule.label.clone(),
                line: line.trim().to_string(),
            });
            out.push(parsed.map(|value_ns| Signal::Sample {
                kind: rule.kind.clone(),
                value_ns,
            }));
        }

        out
    }
}

/// Read `<integer> <ddd>%` from the text preceding a stopwatch label.
///
/// Anything before the integer is ignored, so timestamps or logger prefixes on
/// the same line are tolerated. The label must be separated from the
/// percentage by whitespace.
fn parse_stopwatch_value(prefix: &str) -> Option<u64> {
    if !prefix.ends_with(char::is_whitespace) {
        return None;
    }
    let mut tokens = prefix.split_whitespace().rev();
    let percent = tokens.next()?;
    let nanos = tokens.next()?;

    let digits = percent.strip_suffix('%')?;
    if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if nanos.is_empty() || !nanos.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    nanos.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(signals: Vec<Result<Signal, SignalParseError>>) -> Vec<(MetricKind, u64)> {
        signals
            .into_iter()
            .filter_map(|s| match s {
                Ok(Signal::Sample { kind, value_ns }) => Some((kind, value_ns)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_readiness_marker_from_owner_only() {
        let extractor = SignalExtractor::default();
        let line = "2024-01-01 INFO  Finished preloading TPCW data";

        assert_eq!(
            extractor.extract(WorkerRole::DataManager, line),
            vec![Ok(Signal::Ready(WorkerRole::DataManager))]
        );
        assert!(extractor
            .extract(WorkerRole::ComplianceChecker, line)
            .is_empty());
    }

    #[test]
    fn test_repeated_marker_yields_one_event_per_line() {
        let extractor = SignalExtractor::default();
        for _ in 0..3 {
            let signals = extractor.extract(WorkerRole::DataManager, "Finished preloading");
            assert_eq!(signals.len(), 1);
        }
    }

    #[test]
    fn test_get_policies_sample() {
        let extractor = SignalExtractor::default();
        let signals = extractor.extract(
            WorkerRole::ComplianceChecker,
            "123  045%  get policies from db",
        );
        assert_eq!(samples(signals), vec![(MetricKind::get_policies(), 123)]);
    }

    #[test]
    fn test_matching_sample_with_padding_and_prefix() {
        let extractor = SignalExtractor::default();
        let signals = extractor.extract(
            WorkerRole::ComplianceChecker,
            "  000481516\t 091%   policy matching and conflict resolution  ",
        );
        assert_eq!(
            samples(signals),
            vec![(MetricKind::policy_matching(), 481516)]
        );
    }

    #[test]
    fn test_malformed_payload_is_an_error_not_a_panic() {
        let extractor = SignalExtractor::default();
        for line in [
            "abc  045%  get policies from db",
            "123  45%  get policies from db",
            "get policies from db",
            "99999999999999999999999  001%  get policies from db",
            "123 045%get policies from db",
        ] {
            let signals = extractor.extract(WorkerRole::ComplianceChecker, line);
            assert_eq!(signals.len(), 1, "line: {line}");
            let err = signals[0].clone().unwrap_err();
            assert_eq!(err.label, GET_POLICIES_LABEL);
        }
    }

    #[test]
    fn test_metric_lines_from_other_roles_ignored() {
        let extractor = SignalExtractor::default();
        let signals = extractor.extract(WorkerRole::DataManager, "123  045%  get policies from db");
        assert!(signals.is_empty());
    }

    #[test]
    fn test_custom_metric_rule() {
        let extractor = SignalExtractor::empty().with_metric(
            WorkerRole::DataManager,
            MetricKind::new("x"),
            "metricX",
        );
        let signals = extractor.extract(WorkerRole::DataManager, "300 000% metricX");
        assert_eq!(samples(signals), vec![(MetricKind::new("x"), 300)]);
        assert_eq!(extractor.metric_kinds(), vec![MetricKind::new("x")]);
    }
}
