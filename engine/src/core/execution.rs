//! Transient per-run execution state.
//!
//! Never persisted. On restart it is re-derived from waypoint statuses, see
//! [`crate::core::scheduler::reset_stale_in_progress`].

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    Idle,
    Running,
    PausePending,
    Paused,
    Intervention,
    Done,
}

impl ExecutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::PausePending => "pause_pending",
            Self::Paused => "paused",
            Self::Intervention => "intervention",
            Self::Done => "done",
        }
    }

    pub fn can_transition_to(self, target: ExecutionState) -> bool {
        use ExecutionState as S;
        matches!(
            (self, target),
            (S::Idle, S::Running)
                | (S::Idle, S::Done)
                | (S::Running, S::PausePending)
                | (S::Running, S::Paused)
                | (S::Running, S::Intervention)
                | (S::Running, S::Done)
                | (S::Running, S::Running)
                | (S::PausePending, S::Paused)
                | (S::PausePending, S::Intervention)
                | (S::PausePending, S::Done)
                | (S::Paused, S::Running)
                | (S::Paused, S::Idle)
                | (S::Paused, S::Done)
                | (S::Intervention, S::Running)
                | (S::Intervention, S::Paused)
                | (S::Intervention, S::Done)
                | (S::Done, S::Idle)
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidExecutionTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
}

/// Guarded holder for the current [`ExecutionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMachine {
    state: ExecutionState,
}

impl Default for ExecutionMachine {
    fn default() -> Self {
        Self {
            state: ExecutionState::Idle,
        }
    }
}

impl ExecutionMachine {
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn transition(&mut self, target: ExecutionState) -> Result<(), InvalidExecutionTransition> {
        if !self.state.can_transition_to(target) {
            return Err(InvalidExecutionTransition {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        Ok(())
    }

    /// Ask to pause after the current waypoint. Only meaningful while running.
    pub fn request_pause(&mut self) -> bool {
        if self.state == ExecutionState::Running {
            self.state = ExecutionState::PausePending;
            return true;
        }
        false
    }

    pub fn is_pause_pending(&self) -> bool {
        self.state == ExecutionState::PausePending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_takes_effect_only_from_running() {
        let mut machine = ExecutionMachine::default();
        assert!(!machine.request_pause());
        machine.transition(ExecutionState::Running).expect("start");
        assert!(machine.request_pause());
        assert!(machine.is_pause_pending());
        machine.transition(ExecutionState::Paused).expect("pause");
        machine.transition(ExecutionState::Running).expect("resume");
    }

    #[test]
    fn rejects_edges_outside_the_table() {
        let mut machine = ExecutionMachine::default();
        let err = machine
            .transition(ExecutionState::Intervention)
            .expect_err("idle cannot jump to intervention");
        assert_eq!(err.to_string(), "Invalid transition from idle to intervention");
        assert_eq!(machine.state(), ExecutionState::Idle);
    }

    #[test]
    fn intervention_resolves_to_running_paused_or_done() {
        for target in [
            ExecutionState::Running,
            ExecutionState::Paused,
            ExecutionState::Done,
        ] {
            assert!(ExecutionState::Intervention.can_transition_to(target));
        }
        assert!(!ExecutionState::Intervention.can_transition_to(ExecutionState::Idle));
    }
}
