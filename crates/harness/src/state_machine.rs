use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Phases a single stage run moves through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    StaticCheck,
    DynamicSetup,
    DynamicExchange,
    Teardown,
    Reported,
}

impl StagePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticCheck => "static_check",
            Self::DynamicSetup => "dynamic_setup",
            Self::DynamicExchange => "dynamic_exchange",
            Self::Teardown => "teardown",
            Self::Reported => "reported",
        }
    }
}

pub struct StageStateMachine;

impl StageStateMachine {
    pub fn validate_transition(from: &StagePhase, to: &StagePhase) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(HarnessError::Internal(format!(
                "invalid stage transition from {} to {}",
                from.as_str(),
                to.as_str()
            )))
        }
    }

    fn allowed_transitions(from: &StagePhase) -> Vec<StagePhase> {
        match from {
            // Static failure, or a structural-only stage, reports directly.
            StagePhase::StaticCheck => vec![StagePhase::DynamicSetup, StagePhase::Reported],
            StagePhase::DynamicSetup => vec![StagePhase::DynamicExchange, StagePhase::Teardown],
            StagePhase::DynamicExchange => vec![StagePhase::Teardown],
            // Multi-scenario stages set up a fresh process after teardown.
            StagePhase::Teardown => vec![StagePhase::DynamicSetup, StagePhase::Reported],
            StagePhase::Reported => vec![],
        }
    }

    pub fn can_transition(from: &StagePhase, to: &StagePhase) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

/// Tracks the current phase of one stage run.
#[derive(Debug)]
pub struct StageTracker {
    stage: u8,
    phase: StagePhase,
}

impl StageTracker {
    pub fn new(stage: u8) -> Self {
        Self {
            stage,
            phase: StagePhase::StaticCheck,
        }
    }

    pub fn phase(&self) -> StagePhase {
        self.phase
    }

    pub fn advance(&mut self, to: StagePhase) -> Result<()> {
        StageStateMachine::validate_transition(&self.phase, &to)?;
        tracing::debug!(
            stage = self.stage,
            from = self.phase.as_str(),
            to = to.as_str(),
            "Stage transition"
        );
        self.phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(StageStateMachine::can_transition(
            &StagePhase::StaticCheck,
            &StagePhase::DynamicSetup
        ));
        assert!(StageStateMachine::can_transition(
            &StagePhase::DynamicSetup,
            &StagePhase::Teardown
        ));
        assert!(StageStateMachine::can_transition(
            &StagePhase::DynamicExchange,
            &StagePhase::Teardown
        ));
        assert!(StageStateMachine::can_transition(
            &StagePhase::Teardown,
            &StagePhase::Reported
        ));
    }

    #[test]
    fn test_dynamic_work_always_passes_through_teardown() {
        assert!(!StageStateMachine::can_transition(
            &StagePhase::DynamicSetup,
            &StagePhase::Reported
        ));
        assert!(!StageStateMachine::can_transition(
            &StagePhase::DynamicExchange,
            &StagePhase::Reported
        ));
    }

    #[test]
    fn test_reported_is_terminal() {
        for to in [
            StagePhase::StaticCheck,
            StagePhase::DynamicSetup,
            StagePhase::DynamicExchange,
            StagePhase::Teardown,
            StagePhase::Reported,
        ] {
            assert!(!StageStateMachine::can_transition(&StagePhase::Reported, &to));
        }
    }

    #[test]
    fn test_tracker_rejects_skipping_teardown() {
        let mut tracker = StageTracker::new(2);
        tracker.advance(StagePhase::DynamicSetup).unwrap();
        tracker.advance(StagePhase::DynamicExchange).unwrap();
        assert!(tracker.advance(StagePhase::Reported).is_err());
        assert_eq!(tracker.phase(), StagePhase::DynamicExchange);
    }
}
