//! Worker roles and launch commands.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SourceTag;

/// How long a worker role lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Started once and kept alive for the whole session.
    Persistent,
    /// Torn down and relaunched for every experiment run.
    Restartable,
}

/// The two worker subsystems driven by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Policy-compliance evaluation service; answers the probes.
    ComplianceChecker,
    /// Data-preloading service; restarted with new generation parameters per run.
    DataManager,
}

impl WorkerRole {
    /// Tag prefixed to every log line the role produces.
    pub fn tag(&self) -> SourceTag {
        match self {
            Self::ComplianceChecker => SourceTag::new("CC"),
            Self::DataManager => SourceTag::new("DM"),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            Self::ComplianceChecker => Lifecycle::Persistent,
            Self::DataManager => Lifecycle::Restartable,
        }
    }

    pub fn is_restartable(&self) -> bool {
        self.lifecycle() == Lifecycle::Restartable
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ComplianceChecker => write!(f, "compliance checker"),
            Self::DataManager => write!(f, "data manager"),
        }
    }
}

/// Command line used to launch a worker.
///
/// Rendered as `runtime [options..] [artifact..]`, e.g.
/// `java -Dkey=value -jar data-manager.jar`. Option keys are opaque here;
/// they are defined entirely by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Interpreter or executable to run.
    pub runtime: String,
    /// `key=value` style options placed before the artifact.
    pub options: Vec<String>,
    /// Trailing arguments locating the artifact (e.g. `-jar path.jar`).
    pub artifact: Vec<String>,
}

impl WorkerCommand {
    /// Create a command with no options or artifact.
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            options: Vec::new(),
            artifact: Vec::new(),
        }
    }

    /// Builder method to launch a jar with the given runtime.
    pub fn jar(runtime: impl Into<String>, jar_path: impl Into<String>) -> Self {
        Self::new(runtime).with_artifact(["-jar".to_string(), jar_path.into()])
    }

    /// Builder method to append an option.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Builder method to replace all options.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Builder method to set the artifact arguments.
    pub fn with_artifact<I, S>(mut self, artifact: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifact = artifact.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments passed after the runtime.
    pub fn args(&self) -> Vec<String> {
        self.options
            .iter()
            .chain(self.artifact.iter())
            .cloned()
            .collect()
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.runtime)?;
        for arg in self.args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_tags_and_lifecycle() {
        assert_eq!(WorkerRole::ComplianceChecker.tag().as_str(), "CC");
        assert_eq!(WorkerRole::DataManager.tag().as_str(), "DM");
        assert!(WorkerRole::DataManager.is_restartable());
        assert!(!WorkerRole::ComplianceChecker.is_restartable());
    }

    #[test]
    fn test_options_precede_artifact() {
        let cmd = WorkerCommand::jar("java", "dm.jar")
            .with_option("-Da=1")
            .with_option("-Db=2");

        assert_eq!(cmd.args(), vec!["-Da=1", "-Db=2", "-jar", "dm.jar"]);
        assert_eq!(cmd.to_string(), "java -Da=1 -Db=2 -jar dm.jar");
    }
}
