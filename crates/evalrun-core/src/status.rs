//! Status enums for worker processes and experiment runs.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle state of a supervised worker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    /// Spawned with its reader attached; not yet seen alive by a liveness check.
    #[default]
    Starting,
    /// A liveness check found the process running.
    Running,
    /// Termination signal sent, exit not yet observed.
    Terminating,
    /// Process has exited.
    Terminated,
}

impl WorkerState {
    /// Returns true once a termination signal has been sent or the process exited.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }

    /// Returns true if the process has exited.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Phase of a single experiment run.
///
/// Runs always move `Idle → WorkerStarting → AwaitingReadiness → Probing →
/// TearingDown → Idle`. Failures while starting or waiting skip straight to
/// `TearingDown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    #[default]
    Idle,
    WorkerStarting,
    AwaitingReadiness,
    Probing,
    TearingDown,
}

impl RunPhase {
    /// Returns true if `next` is a legal successor of this phase.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, WorkerStarting)
                | (WorkerStarting, AwaitingReadiness)
                | (WorkerStarting, TearingDown)
                | (AwaitingReadiness, Probing)
                | (AwaitingReadiness, TearingDown)
                | (Probing, TearingDown)
                | (TearingDown, Idle)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: RunPhase) -> Result<(), CoreError> {
        if !self.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut phase = RunPhase::Idle;
        for next in [
            RunPhase::WorkerStarting,
            RunPhase::AwaitingReadiness,
            RunPhase::Probing,
            RunPhase::TearingDown,
            RunPhase::Idle,
        ] {
            phase.advance(next).unwrap();
        }
        assert_eq!(phase, RunPhase::Idle);
    }

    #[test]
    fn test_cannot_probe_before_ready() {
        let mut phase = RunPhase::WorkerStarting;
        let err = phase.advance(RunPhase::Probing).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(phase, RunPhase::WorkerStarting);
    }

    #[test]
    fn test_worker_state_flags() {
        assert!(!WorkerState::Running.is_stopping());
        assert!(WorkerState::Terminating.is_stopping());
        assert!(!WorkerState::Terminating.is_terminal());
        assert!(WorkerState::Terminated.is_terminal());
    }
}
