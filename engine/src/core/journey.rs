//! Project-level journey state machine.
//!
//! Transitions are validated against a static table and recorded in an
//! append-only history. After a crash, [`Journey::recover`] moves any
//! in-flight state to its nearest safe state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JourneyState {
    #[serde(rename = "spark:idle")]
    SparkIdle,
    #[serde(rename = "spark:entering")]
    SparkEntering,
    #[serde(rename = "shape:qa")]
    ShapeQa,
    #[serde(rename = "shape:brief:generating")]
    ShapeBriefGenerating,
    #[serde(rename = "shape:brief:review")]
    ShapeBriefReview,
    #[serde(rename = "shape:spec:generating")]
    ShapeSpecGenerating,
    #[serde(rename = "shape:spec:review")]
    ShapeSpecReview,
    #[serde(rename = "chart:generating")]
    ChartGenerating,
    #[serde(rename = "chart:review")]
    ChartReview,
    #[serde(rename = "fly:ready")]
    FlyReady,
    #[serde(rename = "fly:executing")]
    FlyExecuting,
    #[serde(rename = "fly:paused")]
    FlyPaused,
    #[serde(rename = "fly:intervention")]
    FlyIntervention,
    #[serde(rename = "landed")]
    Landed,
}

impl JourneyState {
    pub const ALL: [JourneyState; 14] = [
        Self::SparkIdle,
        Self::SparkEntering,
        Self::ShapeQa,
        Self::ShapeBriefGenerating,
        Self::ShapeBriefReview,
        Self::ShapeSpecGenerating,
        Self::ShapeSpecReview,
        Self::ChartGenerating,
        Self::ChartReview,
        Self::FlyReady,
        Self::FlyExecuting,
        Self::FlyPaused,
        Self::FlyIntervention,
        Self::Landed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SparkIdle => "spark:idle",
            Self::SparkEntering => "spark:entering",
            Self::ShapeQa => "shape:qa",
            Self::ShapeBriefGenerating => "shape:brief:generating",
            Self::ShapeBriefReview => "shape:brief:review",
            Self::ShapeSpecGenerating => "shape:spec:generating",
            Self::ShapeSpecReview => "shape:spec:review",
            Self::ChartGenerating => "chart:generating",
            Self::ChartReview => "chart:review",
            Self::FlyReady => "fly:ready",
            Self::FlyExecuting => "fly:executing",
            Self::FlyPaused => "fly:paused",
            Self::FlyIntervention => "fly:intervention",
            Self::Landed => "landed",
        }
    }

    /// Allowed targets from this state.
    ///
    /// The match is exhaustive, so a new state cannot be added without
    /// deciding its outgoing edges.
    pub fn allowed_targets(self) -> &'static [JourneyState] {
        use JourneyState as S;
        match self {
            S::SparkIdle => &[S::SparkEntering],
            S::SparkEntering => &[S::ShapeQa],
            S::ShapeQa => &[S::ShapeBriefGenerating],
            S::ShapeBriefGenerating => &[S::ShapeBriefReview],
            S::ShapeBriefReview => &[S::ShapeBriefGenerating, S::ShapeSpecGenerating],
            S::ShapeSpecGenerating => &[S::ShapeSpecReview],
            S::ShapeSpecReview => &[S::ShapeSpecGenerating, S::ChartGenerating],
            S::ChartGenerating => &[S::ChartReview],
            S::ChartReview => &[S::ChartGenerating, S::FlyReady],
            S::FlyReady => &[S::FlyExecuting],
            S::FlyExecuting => &[S::FlyPaused, S::FlyIntervention, S::Landed],
            S::FlyPaused => &[S::FlyExecuting, S::FlyReady],
            S::FlyIntervention => &[S::FlyExecuting, S::FlyPaused, S::ChartReview],
            S::Landed => &[],
        }
    }

    pub fn can_transition_to(self, target: JourneyState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Safe fallback after a crash, or `None` if this state is already safe to resume.
    pub fn recovery_target(self) -> Option<JourneyState> {
        use JourneyState as S;
        match self {
            S::SparkEntering => Some(S::SparkIdle),
            S::ShapeBriefGenerating => Some(S::ShapeQa),
            S::ShapeSpecGenerating => Some(S::ShapeBriefReview),
            S::ChartGenerating => Some(S::ShapeSpecReview),
            S::FlyExecuting | S::FlyIntervention => Some(S::FlyReady),
            S::SparkIdle
            | S::ShapeQa
            | S::ShapeBriefReview
            | S::ShapeSpecReview
            | S::ChartReview
            | S::FlyReady
            | S::FlyPaused
            | S::Landed => None,
        }
    }

    pub fn is_recoverable(self) -> bool {
        self.recovery_target().is_none()
    }

    /// Screen phase that owns this state.
    pub fn phase(self) -> &'static str {
        use JourneyState as S;
        match self {
            S::SparkIdle | S::SparkEntering => "ideation",
            S::ShapeQa => "ideation-qa",
            S::ShapeBriefGenerating | S::ShapeBriefReview => "idea-brief",
            S::ShapeSpecGenerating | S::ShapeSpecReview => "product-spec",
            S::ChartGenerating | S::ChartReview => "chart",
            S::FlyReady | S::FlyExecuting | S::FlyPaused | S::FlyIntervention | S::Landed => {
                "fly"
            }
        }
    }
}

impl std::fmt::Display for JourneyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JourneyState,
    pub to: JourneyState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: JourneyState,
    pub to: JourneyState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journey {
    pub project_slug: String,
    pub state: JourneyState,
    #[serde(default)]
    pub state_history: Vec<StateChange>,
    pub updated_at: DateTime<Utc>,
}

impl Journey {
    pub fn new(project_slug: impl Into<String>) -> Self {
        Self {
            project_slug: project_slug.into(),
            state: JourneyState::SparkIdle,
            state_history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Return a new journey in `target`, or the rejected edge.
    pub fn transition(&self, target: JourneyState) -> Result<Journey, InvalidTransition> {
        if !self.state.can_transition_to(target) {
            return Err(InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        Ok(self.record(target, None))
    }

    /// Move to the recovery fallback. No-op on a recoverable state.
    pub fn recover(&self) -> Journey {
        match self.state.recovery_target() {
            Some(target) => self.record(target, Some("recovery")),
            None => self.clone(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.state.is_recoverable()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.allowed_targets().is_empty()
    }

    pub fn phase(&self) -> &'static str {
        self.state.phase()
    }

    fn record(&self, target: JourneyState, reason: Option<&str>) -> Journey {
        let now = Utc::now();
        let mut next = self.clone();
        next.state_history.push(StateChange {
            from: self.state,
            to: target,
            at: now,
            reason: reason.map(str::to_string),
        });
        next.state = target;
        next.updated_at = now;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(path: &[JourneyState]) -> Journey {
        let mut journey = Journey::new("demo");
        for &state in path {
            journey = journey.transition(state).expect("valid transition");
        }
        journey
    }

    #[test]
    fn every_state_has_edges_or_recovery() {
        for state in JourneyState::ALL {
            // Exhaustive matches make this total; check the recovery targets are safe.
            if let Some(target) = state.recovery_target() {
                assert!(target.is_recoverable(), "{state} recovers to unsafe {target}");
            }
        }
        assert!(JourneyState::Landed.allowed_targets().is_empty());
    }

    #[test]
    fn invalid_transition_carries_edge() {
        let journey = Journey::new("demo");
        let err = journey
            .transition(JourneyState::FlyExecuting)
            .expect_err("should reject");
        assert_eq!(err.from, JourneyState::SparkIdle);
        assert_eq!(err.to, JourneyState::FlyExecuting);
        assert_eq!(
            err.to_string(),
            "Invalid transition from spark:idle to fly:executing"
        );
        assert_eq!(journey.state, JourneyState::SparkIdle);
    }

    #[test]
    fn full_journey_reaches_landed() {
        use JourneyState as S;
        let journey = walk(&[
            S::SparkEntering,
            S::ShapeQa,
            S::ShapeBriefGenerating,
            S::ShapeBriefReview,
            S::ShapeSpecGenerating,
            S::ShapeSpecReview,
            S::ChartGenerating,
            S::ChartReview,
            S::FlyReady,
            S::FlyExecuting,
            S::Landed,
        ]);
        assert_eq!(journey.state, S::Landed);
        assert_eq!(journey.state_history.len(), 11);
        assert!(journey.is_terminal());
        assert_eq!(journey.phase(), "fly");
    }

    #[test]
    fn recover_from_executing_lands_on_ready_once() {
        use JourneyState as S;
        let journey = walk(&[
            S::SparkEntering,
            S::ShapeQa,
            S::ShapeBriefGenerating,
            S::ShapeBriefReview,
            S::ShapeSpecGenerating,
            S::ShapeSpecReview,
            S::ChartGenerating,
            S::ChartReview,
            S::FlyReady,
            S::FlyExecuting,
        ]);
        assert!(!journey.is_recoverable());

        let recovered = journey.recover();
        assert_eq!(recovered.state, S::FlyReady);
        let last = recovered.state_history.last().expect("history");
        assert_eq!(last.reason.as_deref(), Some("recovery"));

        let again = recovered.recover();
        assert_eq!(again, recovered);
    }

    #[test]
    fn recover_from_entering_goes_idle() {
        let journey = walk(&[JourneyState::SparkEntering]);
        let recovered = journey.recover();
        assert_eq!(recovered.state, JourneyState::SparkIdle);
        assert_eq!(recovered.state_history.len(), 2);
    }

    #[test]
    fn state_round_trips_through_serde_value() {
        let raw = serde_json::to_string(&JourneyState::ShapeBriefReview).expect("serialize");
        assert_eq!(raw, "\"shape:brief:review\"");
        let parsed: JourneyState = serde_json::from_str("\"fly:intervention\"").expect("parse");
        assert_eq!(parsed, JourneyState::FlyIntervention);
    }
}
