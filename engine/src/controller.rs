//! Execution controller: the single owner of a run's mutable state.
//!
//! The controller holds the flight plan, the transient [`ExecutionMachine`],
//! any pending [`Intervention`] and (when the project has one) the journey.
//! Callers feed it executor outcomes and intervention resolutions and act on
//! the [`ExecutionDirective`] it returns. It performs no I/O itself apart from
//! the repository reset a rollback asks for.

use anyhow::{Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::execution::{ExecutionMachine, ExecutionState};
use crate::core::intervention::{
    Intervention, InterventionAction, InterventionResult, InterventionType,
};
use crate::core::journey::{Journey, JourneyState};
use crate::core::scheduler::{
    NextActionKind, build_completion_status, build_intervention_resolution, build_next_action,
    prepare_waypoint_for_rerun, reset_stale_in_progress, select_next_waypoint_candidate,
};
use crate::core::waypoint::{FlightPlan, Waypoint, WaypointStatus};
use crate::io::executor::ExecutionOutcome;
use crate::io::repository::RepositoryService;

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionDirective {
    /// Run this waypoint (already marked `in_progress`).
    Execute(Waypoint),
    Pause(String),
    /// Execution stopped; resolve before continuing.
    Intervention(Box<Intervention>),
    /// Every waypoint is complete or skipped.
    Land,
    /// Nothing to do.
    Noop(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionController {
    plan: FlightPlan,
    machine: ExecutionMachine,
    journey: Option<Journey>,
    pending: Option<Intervention>,
    max_iterations: u32,
    additional_iterations: u32,
    include_failed: bool,
}

impl ExecutionController {
    pub fn new(plan: FlightPlan, journey: Option<Journey>, max_iterations: u32) -> Self {
        Self {
            plan,
            machine: ExecutionMachine::default(),
            journey,
            pending: None,
            max_iterations,
            additional_iterations: 0,
            include_failed: false,
        }
    }

    pub fn plan(&self) -> &FlightPlan {
        &self.plan
    }

    pub fn into_plan(self) -> FlightPlan {
        self.plan
    }

    pub fn journey(&self) -> Option<&Journey> {
        self.journey.as_ref()
    }

    pub fn state(&self) -> ExecutionState {
        self.machine.state()
    }

    pub fn pending_intervention(&self) -> Option<&Intervention> {
        self.pending.as_ref()
    }

    /// Prepare for a run and return the first candidate, if any.
    ///
    /// Waypoints left `in_progress` by an earlier process are always reset to
    /// `pending` first. With `include_in_progress`, `failed` waypoints are
    /// then resumed ahead of pending ones on every selection of the run.
    #[instrument(skip_all, fields(include_in_progress))]
    pub fn initialize(&mut self, include_in_progress: bool) -> Result<Option<Waypoint>> {
        self.include_failed = include_in_progress;
        if reset_stale_in_progress(&mut self.plan) {
            info!("reset stale in_progress waypoints");
            self.plan.updated_at = chrono::Utc::now();
        }
        if self
            .journey
            .as_ref()
            .is_some_and(|journey| journey.state == JourneyState::ChartReview)
        {
            self.advance_journey(JourneyState::FlyReady);
        }

        let candidate =
            select_next_waypoint_candidate(&self.plan, self.include_failed).cloned();
        if candidate.is_none() && self.machine.state() == ExecutionState::Idle {
            self.machine.transition(ExecutionState::Done)?;
        }
        debug!(candidate = ?candidate.as_ref().map(|wp| wp.id.as_str()), "initialized");
        Ok(candidate)
    }

    /// Begin (or resume) execution, optionally at a specific waypoint.
    #[instrument(skip_all, fields(waypoint_id = ?waypoint_id))]
    pub fn start(&mut self, waypoint_id: Option<&str>) -> Result<ExecutionDirective> {
        match self.machine.state() {
            ExecutionState::Running | ExecutionState::PausePending => {
                return Ok(ExecutionDirective::Noop(
                    "Execution already running".to_string(),
                ));
            }
            ExecutionState::Intervention => {
                if let Some(pending) = &self.pending {
                    return Ok(ExecutionDirective::Intervention(Box::new(pending.clone())));
                }
            }
            ExecutionState::Done => self.machine.transition(ExecutionState::Idle)?,
            ExecutionState::Idle | ExecutionState::Paused => {}
        }

        let id = match waypoint_id {
            Some(id) => {
                let Some(wp) = self.plan.get_waypoint_mut(id) else {
                    return Ok(ExecutionDirective::Noop(format!("Waypoint {id} not found")));
                };
                prepare_waypoint_for_rerun(wp);
                if !matches!(
                    wp.status,
                    WaypointStatus::Pending | WaypointStatus::InProgress
                ) {
                    return Ok(ExecutionDirective::Noop(format!(
                        "Waypoint {id} is {}",
                        wp.status
                    )));
                }
                id.to_string()
            }
            None => match select_next_waypoint_candidate(&self.plan, self.include_failed) {
                Some(wp) => wp.id.clone(),
                None => return self.nothing_to_run(),
            },
        };
        self.begin(&id)
    }

    /// Ask to pause once the current waypoint finishes.
    pub fn request_pause(&mut self) -> bool {
        self.machine.request_pause()
    }

    /// Apply an executor outcome for `waypoint_id`.
    #[instrument(skip_all, fields(waypoint_id))]
    pub fn handle_execution_result(
        &mut self,
        waypoint_id: &str,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionDirective> {
        let Some(wp) = self.plan.get_waypoint_mut(waypoint_id) else {
            bail!("unknown waypoint {waypoint_id}");
        };
        match outcome {
            ExecutionOutcome::Success => {
                wp.mark_complete();
                self.touch();
                info!("waypoint complete");
                if self.machine.is_pause_pending() {
                    return self.pause(format!("Paused after {waypoint_id}"));
                }
                let next = build_next_action(&self.plan, self.include_failed);
                self.follow(next.kind, next.waypoint, next.message)
            }
            ExecutionOutcome::Cancelled => {
                wp.status = WaypointStatus::Pending;
                self.touch();
                self.pause("Execution cancelled".to_string())
            }
            ExecutionOutcome::Failed(reason) => {
                let wp = wp.clone();
                let intervention = Intervention::new(
                    InterventionType::ExecutionError,
                    wp,
                    self.effective_iterations(),
                    self.effective_iterations(),
                    reason,
                );
                self.intervene(intervention)
            }
            ExecutionOutcome::MaxIterations => {
                let wp = wp.clone();
                let budget = self.effective_iterations();
                let intervention = Intervention::new(
                    InterventionType::IterationLimit,
                    wp,
                    budget,
                    budget,
                    format!("Reached iteration limit ({budget})"),
                );
                self.intervene(intervention)
            }
            ExecutionOutcome::InterventionNeeded(intervention) => self.intervene(*intervention),
        }
    }

    /// Apply a resolution to the pending intervention.
    ///
    /// `rollback` resets the checkout through `repository` before pausing; a
    /// failed reset is logged and reported in the pause message.
    #[instrument(skip_all, fields(action = %result.action))]
    pub fn resolve_intervention(
        &mut self,
        result: &InterventionResult,
        repository: &dyn RepositoryService,
    ) -> Result<ExecutionDirective> {
        let Some(intervention) = self.pending.take() else {
            bail!("no pending intervention to resolve");
        };
        let waypoint_id = intervention.waypoint.id.clone();
        let (status, next) = build_intervention_resolution(
            &self.plan,
            &intervention,
            result.action,
            result.additional_iterations,
            result.rollback_ref.as_deref(),
        );

        if result.action == InterventionAction::Edit
            && let Some(edited) = &result.modified_waypoint
        {
            let mut edited = edited.clone();
            if let Some(current) = self.plan.get_waypoint(&waypoint_id) {
                edited.status = current.status;
            }
            self.plan.update_waypoint(edited);
        }
        if let Some(status) = status
            && let Some(wp) = self.plan.get_waypoint_mut(&waypoint_id)
        {
            wp.status = status;
            if status != WaypointStatus::Complete {
                wp.completed_at = None;
            }
            self.touch();
        }

        match result.action {
            InterventionAction::Retry => {
                self.additional_iterations += result.additional_iterations;
                self.begin(&waypoint_id)
            }
            InterventionAction::Rollback => {
                let mut message = next
                    .message
                    .unwrap_or_else(|| "Rollback requested".to_string());
                if let Some(reference) = result.rollback_ref.as_deref() {
                    let reset = repository.reset_hard(reference);
                    if reset.success {
                        info!(reference, "checkout reset for rollback");
                    } else {
                        warn!(reference, reason = %reset.message, "rollback reset failed");
                        message = format!("{message} ({})", reset.message);
                    }
                }
                self.pause(message)
            }
            InterventionAction::Abort => {
                self.machine.transition(ExecutionState::Done)?;
                self.advance_journey(JourneyState::FlyPaused);
                Ok(ExecutionDirective::Noop(
                    next.message
                        .unwrap_or_else(|| "Execution aborted".to_string()),
                ))
            }
            InterventionAction::Skip
            | InterventionAction::Edit
            | InterventionAction::Wait => self.follow(next.kind, next.waypoint, next.message),
        }
    }

    /// Drop the pending intervention, leaving its waypoint `failed`, and move
    /// on to the next candidate.
    #[instrument(skip_all)]
    pub fn continue_after_failure(&mut self) -> Result<ExecutionDirective> {
        let Some(intervention) = self.pending.take() else {
            bail!("no pending intervention to resolve");
        };
        debug!(waypoint_id = %intervention.waypoint.id, "continuing past failure");
        let next = build_next_action(&self.plan, self.include_failed);
        self.follow(next.kind, next.waypoint, next.message)
    }

    /// Extra iterations granted by retries, reset to zero on read.
    pub fn consume_additional_iterations(&mut self) -> u32 {
        std::mem::take(&mut self.additional_iterations)
    }

    fn effective_iterations(&self) -> u32 {
        self.max_iterations + self.additional_iterations
    }

    fn begin(&mut self, waypoint_id: &str) -> Result<ExecutionDirective> {
        let Some(wp) = self.plan.get_waypoint_mut(waypoint_id) else {
            bail!("unknown waypoint {waypoint_id}");
        };
        wp.status = WaypointStatus::InProgress;
        let wp = wp.clone();
        self.touch();
        self.machine.transition(ExecutionState::Running)?;
        self.advance_journey(JourneyState::FlyExecuting);
        debug!(waypoint_id, "executing waypoint");
        Ok(ExecutionDirective::Execute(wp))
    }

    fn follow(
        &mut self,
        kind: NextActionKind,
        waypoint: Option<Waypoint>,
        message: Option<String>,
    ) -> Result<ExecutionDirective> {
        match (kind, waypoint) {
            (NextActionKind::Continue, Some(next)) => self.begin(&next.id),
            (NextActionKind::Complete, _) => self.land(),
            (NextActionKind::Abort, _) => {
                self.machine.transition(ExecutionState::Done)?;
                Ok(ExecutionDirective::Noop(
                    message.unwrap_or_else(|| "Execution aborted".to_string()),
                ))
            }
            _ => self.pause(message.unwrap_or_else(|| "Paused".to_string())),
        }
    }

    fn nothing_to_run(&mut self) -> Result<ExecutionDirective> {
        if build_completion_status(&self.plan).all_complete() {
            return self.land();
        }
        let next = build_next_action(&self.plan, self.include_failed);
        Ok(ExecutionDirective::Noop(next.message.unwrap_or_else(|| {
            "No executable waypoints available".to_string()
        })))
    }

    fn intervene(&mut self, intervention: Intervention) -> Result<ExecutionDirective> {
        if let Some(wp) = self.plan.get_waypoint_mut(&intervention.waypoint.id) {
            wp.status = WaypointStatus::Failed;
        }
        self.touch();
        self.machine.transition(ExecutionState::Intervention)?;
        self.advance_journey(JourneyState::FlyIntervention);
        warn!(
            kind = %intervention.kind,
            summary = %intervention.error_summary,
            "intervention needed"
        );
        self.pending = Some(intervention.clone());
        Ok(ExecutionDirective::Intervention(Box::new(intervention)))
    }

    fn pause(&mut self, message: String) -> Result<ExecutionDirective> {
        self.machine.transition(ExecutionState::Paused)?;
        self.advance_journey(JourneyState::FlyPaused);
        info!(reason = %message, "execution paused");
        Ok(ExecutionDirective::Pause(message))
    }

    fn land(&mut self) -> Result<ExecutionDirective> {
        if self.machine.state() != ExecutionState::Done {
            self.machine.transition(ExecutionState::Done)?;
        }
        self.advance_journey(JourneyState::FlyExecuting);
        self.advance_journey(JourneyState::Landed);
        info!("all waypoints complete");
        Ok(ExecutionDirective::Land)
    }

    fn touch(&mut self) {
        self.plan.updated_at = chrono::Utc::now();
    }

    /// Journey bookkeeping never blocks execution; disallowed edges are skipped.
    fn advance_journey(&mut self, target: JourneyState) {
        let Some(journey) = &self.journey else {
            return;
        };
        if journey.state == target {
            return;
        }
        match journey.transition(target) {
            Ok(next) => self.journey = Some(next),
            Err(err) => debug!(err = %err, "journey transition skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingRepository, plan_of, waypoint, with_deps, with_status};

    fn fly_ready() -> Journey {
        let mut journey = Journey::new("demo");
        for state in [
            JourneyState::SparkEntering,
            JourneyState::ShapeQa,
            JourneyState::ShapeBriefGenerating,
            JourneyState::ShapeBriefReview,
            JourneyState::ShapeSpecGenerating,
            JourneyState::ShapeSpecReview,
            JourneyState::ChartGenerating,
            JourneyState::ChartReview,
        ] {
            journey = journey.transition(state).expect("valid edge");
        }
        journey
    }

    fn controller(waypoints: Vec<Waypoint>) -> ExecutionController {
        ExecutionController::new(plan_of(waypoints), Some(fly_ready()), 10)
    }

    fn status(ctl: &ExecutionController, id: &str) -> WaypointStatus {
        ctl.plan().get_waypoint(id).expect("waypoint").status
    }

    fn executing(directive: &ExecutionDirective) -> &str {
        match directive {
            ExecutionDirective::Execute(wp) => wp.id.as_str(),
            other => panic!("expected execute, got {other:?}"),
        }
    }

    #[test]
    fn runs_plan_to_landing() {
        let mut ctl = controller(vec![waypoint("a"), with_deps(waypoint("b"), &["a"])]);
        assert_eq!(ctl.initialize(false).expect("init").map(|wp| wp.id), Some("a".to_string()));
        assert_eq!(ctl.journey().expect("journey").state, JourneyState::FlyReady);

        let first = ctl.start(None).expect("start");
        assert_eq!(executing(&first), "a");
        assert_eq!(status(&ctl, "a"), WaypointStatus::InProgress);
        assert_eq!(ctl.journey().expect("journey").state, JourneyState::FlyExecuting);

        let next = ctl
            .handle_execution_result("a", ExecutionOutcome::Success)
            .expect("handle");
        assert_eq!(executing(&next), "b");
        let done = ctl
            .handle_execution_result("b", ExecutionOutcome::Success)
            .expect("handle");
        assert_eq!(done, ExecutionDirective::Land);
        assert_eq!(ctl.state(), ExecutionState::Done);
        assert_eq!(ctl.journey().expect("journey").state, JourneyState::Landed);
        assert!(ctl.plan().get_waypoint("b").expect("b").completed_at.is_some());
    }

    #[test]
    fn initialize_resets_stale_work_and_resumes_failures() {
        let mut ctl = controller(vec![with_status(waypoint("a"), WaypointStatus::InProgress)]);
        ctl.initialize(false).expect("init");
        assert_eq!(status(&ctl, "a"), WaypointStatus::Pending);

        let mut resume = controller(vec![
            waypoint("first"),
            with_status(waypoint("crashed"), WaypointStatus::InProgress),
            with_status(waypoint("stuck"), WaypointStatus::Failed),
        ]);
        let candidate = resume.initialize(true).expect("init").expect("candidate");
        assert_eq!(candidate.id, "stuck");
        assert_eq!(status(&resume, "crashed"), WaypointStatus::Pending);
    }

    #[test]
    fn resuming_run_reselects_every_failed_waypoint() {
        let mut ctl = controller(vec![
            with_status(waypoint("a"), WaypointStatus::Failed),
            with_status(waypoint("b"), WaypointStatus::Failed),
        ]);
        ctl.initialize(true).expect("init");
        assert_eq!(executing(&ctl.start(None).expect("start")), "a");
        let next = ctl
            .handle_execution_result("a", ExecutionOutcome::Success)
            .expect("handle");
        assert_eq!(executing(&next), "b");
    }

    #[test]
    fn continue_after_failure_keeps_waypoint_failed() {
        let mut ctl = controller(vec![
            waypoint("a"),
            with_deps(waypoint("b"), &["a"]),
            waypoint("c"),
        ]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        ctl.handle_execution_result("a", ExecutionOutcome::Failed("boom".to_string()))
            .expect("handle");

        let next = ctl.continue_after_failure().expect("continue");
        assert_eq!(executing(&next), "c");
        assert_eq!(status(&ctl, "a"), WaypointStatus::Failed);
        assert!(ctl.pending_intervention().is_none());
        assert!(ctl.continue_after_failure().is_err());
    }

    #[test]
    fn pause_request_takes_effect_after_current_waypoint() {
        let mut ctl = controller(vec![waypoint("a"), waypoint("b")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        assert!(ctl.request_pause());

        let directive = ctl
            .handle_execution_result("a", ExecutionOutcome::Success)
            .expect("handle");
        assert_eq!(directive, ExecutionDirective::Pause("Paused after a".to_string()));
        assert_eq!(status(&ctl, "a"), WaypointStatus::Complete);
        assert_eq!(ctl.state(), ExecutionState::Paused);
        assert_eq!(ctl.journey().expect("journey").state, JourneyState::FlyPaused);

        assert_eq!(executing(&ctl.start(None).expect("resume")), "b");
    }

    #[test]
    fn failure_becomes_intervention_and_retry_grants_iterations() {
        let mut ctl = controller(vec![waypoint("a")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");

        let directive = ctl
            .handle_execution_result("a", ExecutionOutcome::MaxIterations)
            .expect("handle");
        let ExecutionDirective::Intervention(intervention) = directive else {
            panic!("expected intervention");
        };
        assert_eq!(intervention.kind, InterventionType::IterationLimit);
        assert_eq!(status(&ctl, "a"), WaypointStatus::Failed);
        assert_eq!(ctl.state(), ExecutionState::Intervention);
        assert!(matches!(
            ctl.start(None).expect("start"),
            ExecutionDirective::Intervention(_)
        ));

        let repo = RecordingRepository::default();
        let retried = ctl
            .resolve_intervention(&InterventionResult::new(InterventionAction::Retry), &repo)
            .expect("resolve");
        assert_eq!(executing(&retried), "a");
        assert_eq!(ctl.consume_additional_iterations(), 5);
        assert_eq!(ctl.consume_additional_iterations(), 0);
        assert!(ctl.pending_intervention().is_none());
    }

    #[test]
    fn skip_moves_to_next_candidate() {
        let mut ctl = controller(vec![waypoint("a"), waypoint("b")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        ctl.handle_execution_result("a", ExecutionOutcome::Failed("boom".to_string()))
            .expect("handle");

        let next = ctl
            .resolve_intervention(
                &InterventionResult::new(InterventionAction::Skip),
                &RecordingRepository::default(),
            )
            .expect("resolve");
        assert_eq!(executing(&next), "b");
        assert_eq!(status(&ctl, "a"), WaypointStatus::Skipped);
    }

    #[test]
    fn rollback_resets_checkout_then_pauses() {
        let mut ctl = controller(vec![waypoint("a")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        ctl.handle_execution_result("a", ExecutionOutcome::Failed("boom".to_string()))
            .expect("handle");

        let repo = RecordingRepository::default();
        let directive = ctl
            .resolve_intervention(&InterventionResult::rollback_to("demo/WP-0"), &repo)
            .expect("resolve");
        assert!(matches!(directive, ExecutionDirective::Pause(_)));
        assert_eq!(repo.calls(), vec!["reset_hard demo/WP-0".to_string()]);
        assert_eq!(status(&ctl, "a"), WaypointStatus::Pending);
        assert_eq!(ctl.state(), ExecutionState::Paused);
    }

    #[test]
    fn failed_rollback_is_reported_not_raised() {
        let mut ctl = controller(vec![waypoint("a")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        ctl.handle_execution_result("a", ExecutionOutcome::Failed("boom".to_string()))
            .expect("handle");

        let repo = RecordingRepository::default().failing_reset();
        let directive = ctl
            .resolve_intervention(&InterventionResult::rollback_to("missing"), &repo)
            .expect("resolve");
        let ExecutionDirective::Pause(message) = directive else {
            panic!("expected pause");
        };
        assert!(message.contains("Target not found"));
    }

    #[test]
    fn abort_marks_failed_and_ends_run() {
        let mut ctl = controller(vec![waypoint("a"), waypoint("b")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        ctl.handle_execution_result("a", ExecutionOutcome::Failed("boom".to_string()))
            .expect("handle");

        let directive = ctl
            .resolve_intervention(
                &InterventionResult::new(InterventionAction::Abort),
                &RecordingRepository::default(),
            )
            .expect("resolve");
        assert_eq!(directive, ExecutionDirective::Noop("Execution aborted".to_string()));
        assert_eq!(status(&ctl, "a"), WaypointStatus::Failed);
        assert_eq!(ctl.state(), ExecutionState::Done);
        assert_eq!(ctl.journey().expect("journey").state, JourneyState::FlyPaused);
    }

    #[test]
    fn edit_replaces_waypoint_content_and_keeps_status() {
        let mut ctl = controller(vec![waypoint("a")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        ctl.handle_execution_result("a", ExecutionOutcome::Failed("boom".to_string()))
            .expect("handle");

        let mut edited = waypoint("a");
        edited.objective = "smaller scope".to_string();
        let result = InterventionResult {
            modified_waypoint: Some(edited),
            ..InterventionResult::new(InterventionAction::Edit)
        };
        let directive = ctl
            .resolve_intervention(&result, &RecordingRepository::default())
            .expect("resolve");
        assert!(matches!(directive, ExecutionDirective::Pause(_)));
        let wp = ctl.plan().get_waypoint("a").expect("a");
        assert_eq!(wp.objective, "smaller scope");
        assert_eq!(wp.status, WaypointStatus::Failed);
    }

    #[test]
    fn cancelled_returns_waypoint_to_pending() {
        let mut ctl = controller(vec![waypoint("a")]);
        ctl.initialize(false).expect("init");
        ctl.start(None).expect("start");
        let directive = ctl
            .handle_execution_result("a", ExecutionOutcome::Cancelled)
            .expect("handle");
        assert_eq!(directive, ExecutionDirective::Pause("Execution cancelled".to_string()));
        assert_eq!(status(&ctl, "a"), WaypointStatus::Pending);
    }

    #[test]
    fn start_with_id_reruns_completed_waypoint() {
        let mut ctl = controller(vec![with_status(waypoint("a"), WaypointStatus::Complete)]);
        ctl.initialize(false).expect("init");
        assert_eq!(ctl.state(), ExecutionState::Done);
        assert_eq!(executing(&ctl.start(Some("a")).expect("start")), "a");
        assert!(matches!(
            ctl.start(Some("ghost")).expect("start"),
            ExecutionDirective::Noop(_)
        ));
    }

    #[test]
    fn blocked_plan_reports_noop() {
        let mut ctl = controller(vec![
            with_status(waypoint("a"), WaypointStatus::Failed),
            with_deps(waypoint("b"), &["a"]),
        ]);
        ctl.initialize(false).expect("init");
        assert_eq!(
            ctl.start(None).expect("start"),
            ExecutionDirective::Noop("1 waypoint(s) blocked by failures".to_string())
        );
    }

    #[test]
    fn resolving_without_pending_is_an_error() {
        let mut ctl = controller(vec![waypoint("a")]);
        assert!(
            ctl.resolve_intervention(
                &InterventionResult::new(InterventionAction::Retry),
                &RecordingRepository::default()
            )
            .is_err()
        );
    }
}
