//! Core domain errors.

use thiserror::Error;

/// Core domain errors for evalrun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid run phase transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Experiment plan failed validation.
    #[error("Invalid experiment plan: {0}")]
    InvalidPlan(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A log line carried a known metric label but its payload could not be read.
///
/// Recovered by dropping the sample; never fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unparseable '{label}' sample: {line:?}")]
pub struct SignalParseError {
    /// Metric label that matched.
    pub label: String,
    /// The offending line, trimmed.
    pub line: String,
}
