//! Pure scheduling decisions over a [`FlightPlan`].
//!
//! Every function here is total: malformed plans (dangling ids, cycles) make
//! waypoints ineligible, they never cause an error.

use std::collections::{HashMap, HashSet};

use crate::core::intervention::{Intervention, InterventionAction};
use crate::core::waypoint::{FlightPlan, Waypoint, WaypointStatus};

/// Aggregate waypoint counts. `complete` includes skipped waypoints and
/// `pending` excludes those blocked by a failed dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStatus {
    pub total: usize,
    pub complete: usize,
    pub pending: usize,
    pub failed: usize,
    pub blocked: usize,
    pub in_progress: usize,
}

impl CompletionStatus {
    pub fn all_complete(&self) -> bool {
        self.complete == self.total
    }

    pub fn has_failed(&self) -> bool {
        self.failed > 0
    }

    pub fn has_blocked(&self) -> bool {
        self.blocked > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextActionKind {
    Continue,
    Pause,
    Intervention,
    Complete,
    Abort,
}

/// What the run loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextAction {
    pub kind: NextActionKind,
    pub waypoint: Option<Waypoint>,
    pub message: Option<String>,
}

impl NextAction {
    pub fn continue_with(waypoint: &Waypoint) -> Self {
        Self {
            kind: NextActionKind::Continue,
            waypoint: Some(waypoint.clone()),
            message: None,
        }
    }

    pub fn with_message(kind: NextActionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            waypoint: None,
            message: Some(message.into()),
        }
    }
}

/// First eligible waypoint in plan order.
///
/// With `include_failed`, any `in_progress` or `failed` waypoint is resumed
/// first. Otherwise only pending waypoints whose dependencies are all
/// satisfied (and, for epics, whose children are all satisfied) qualify.
pub fn select_next_waypoint_candidate(
    plan: &FlightPlan,
    include_failed: bool,
) -> Option<&Waypoint> {
    if include_failed
        && let Some(resumable) = plan.waypoints.iter().find(|wp| {
            matches!(
                wp.status,
                WaypointStatus::InProgress | WaypointStatus::Failed
            )
        })
    {
        return Some(resumable);
    }

    plan.waypoints.iter().find(|wp| {
        wp.status == WaypointStatus::Pending
            && children_done(plan, wp)
            && dependencies_met(plan, wp)
    })
}

fn children_done(plan: &FlightPlan, wp: &Waypoint) -> bool {
    plan.get_children(&wp.id)
        .iter()
        .all(|child| child.status.is_satisfied())
}

/// Every dependency resolves to a complete or skipped waypoint. Missing ids block.
fn dependencies_met(plan: &FlightPlan, wp: &Waypoint) -> bool {
    wp.dependencies.iter().all(|dep| {
        plan.get_waypoint(dep)
            .is_some_and(|dependency| dependency.status.is_satisfied())
    })
}

pub fn build_completion_status(plan: &FlightPlan) -> CompletionStatus {
    let mut status = CompletionStatus {
        total: plan.waypoints.len(),
        ..CompletionStatus::default()
    };
    for wp in &plan.waypoints {
        match wp.status {
            WaypointStatus::Complete | WaypointStatus::Skipped => status.complete += 1,
            WaypointStatus::Failed => status.failed += 1,
            WaypointStatus::InProgress => status.in_progress += 1,
            WaypointStatus::Pending => {
                let blocked = wp.dependencies.iter().any(|dep| {
                    plan.get_waypoint(dep)
                        .is_some_and(|dependency| dependency.status == WaypointStatus::Failed)
                });
                if blocked {
                    status.blocked += 1;
                } else {
                    status.pending += 1;
                }
            }
        }
    }
    status
}

/// Detect dependency cycles. Returns one message per cycle found, empty when acyclic.
pub fn validate_dependencies(plan: &FlightPlan) -> Vec<String> {
    let graph: HashMap<&str, Vec<&str>> = plan
        .waypoints
        .iter()
        .map(|wp| {
            (
                wp.id.as_str(),
                wp.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut errors = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    for wp in &plan.waypoints {
        if !visited.contains(wp.id.as_str())
            && has_cycle(&graph, wp.id.as_str(), &mut visited, &mut on_stack)
        {
            errors.push(format!("Circular dependency detected involving {}", wp.id));
        }
        // An early return leaves the path on the stack.
        on_stack.clear();
    }
    errors
}

fn has_cycle<'a>(
    graph: &HashMap<&'a str, Vec<&'a str>>,
    node: &'a str,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
) -> bool {
    visited.insert(node);
    on_stack.insert(node);
    if let Some(deps) = graph.get(node) {
        for &dep in deps {
            if !visited.contains(dep) {
                if has_cycle(graph, dep, visited, on_stack) {
                    return true;
                }
            } else if on_stack.contains(dep) {
                return true;
            }
        }
    }
    on_stack.remove(node);
    false
}

/// Decide what follows a successful waypoint.
pub fn build_next_action_after_success(plan: &FlightPlan) -> NextAction {
    build_next_action(plan, false)
}

/// [`build_next_action_after_success`] for a run that resumes `in_progress`
/// and `failed` waypoints (`include_failed`) on every selection.
pub fn build_next_action(plan: &FlightPlan, include_failed: bool) -> NextAction {
    if let Some(next) = select_next_waypoint_candidate(plan, include_failed) {
        return NextAction::continue_with(next);
    }

    let status = build_completion_status(plan);
    if status.all_complete() {
        return NextAction::with_message(NextActionKind::Complete, "All waypoints complete!");
    }
    if status.has_blocked() {
        return NextAction::with_message(
            NextActionKind::Pause,
            format!("{} waypoint(s) blocked by failures", status.blocked),
        );
    }
    if status.has_failed() {
        return NextAction::with_message(
            NextActionKind::Pause,
            format!("{} waypoint(s) failed", status.failed),
        );
    }
    let waiting = status.pending + status.in_progress;
    if waiting > 0 {
        return NextAction::with_message(
            NextActionKind::Pause,
            format!("{waiting} waypoint(s) waiting"),
        );
    }
    NextAction::with_message(NextActionKind::Pause, "No executable waypoints available")
}

/// Map an intervention resolution to a status change and the next action.
///
/// The plan is only read. For `skip` the lookahead runs against a copy with
/// the waypoint marked skipped; callers apply the returned status themselves.
pub fn build_intervention_resolution(
    plan: &FlightPlan,
    intervention: &Intervention,
    action: InterventionAction,
    additional_iterations: u32,
    rollback_ref: Option<&str>,
) -> (Option<WaypointStatus>, NextAction) {
    let waypoint = &intervention.waypoint;
    match action {
        InterventionAction::Retry => (
            Some(WaypointStatus::InProgress),
            NextAction {
                kind: NextActionKind::Continue,
                waypoint: Some(waypoint.clone()),
                message: Some(format!(
                    "Retrying with {additional_iterations} more iterations"
                )),
            },
        ),
        InterventionAction::Skip => {
            let mut lookahead = plan.clone();
            if let Some(wp) = lookahead.get_waypoint_mut(&waypoint.id) {
                wp.status = WaypointStatus::Skipped;
            }
            (
                Some(WaypointStatus::Skipped),
                build_next_action_after_success(&lookahead),
            )
        }
        InterventionAction::Rollback => {
            let message = match rollback_ref {
                Some(reference) => format!("Rollback requested for {reference}"),
                None => "Rollback requested".to_string(),
            };
            (
                Some(WaypointStatus::Pending),
                NextAction::with_message(NextActionKind::Pause, message),
            )
        }
        InterventionAction::Abort => (
            Some(WaypointStatus::Failed),
            NextAction::with_message(NextActionKind::Abort, "Execution aborted"),
        ),
        InterventionAction::Edit => (
            None,
            NextAction::with_message(NextActionKind::Pause, "Edit waypoint and retry"),
        ),
        InterventionAction::Wait => (
            Some(WaypointStatus::Pending),
            NextAction::with_message(NextActionKind::Pause, "Paused waiting for budget reset"),
        ),
    }
}

/// Reset a complete or failed waypoint back to pending. Returns false otherwise.
pub fn prepare_waypoint_for_rerun(waypoint: &mut Waypoint) -> bool {
    if !matches!(
        waypoint.status,
        WaypointStatus::Complete | WaypointStatus::Failed
    ) {
        return false;
    }
    waypoint.status = WaypointStatus::Pending;
    waypoint.completed_at = None;
    true
}

/// Crash recovery: anything left `in_progress` by a previous process is pending again.
pub fn reset_stale_in_progress(plan: &mut FlightPlan) -> bool {
    let mut changed = false;
    for wp in &mut plan.waypoints {
        if wp.status == WaypointStatus::InProgress {
            wp.status = WaypointStatus::Pending;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intervention::InterventionType;
    use crate::test_support::{child_of, plan_of, waypoint, with_deps, with_status};

    fn ids(plan: &FlightPlan, include_failed: bool) -> Option<&str> {
        select_next_waypoint_candidate(plan, include_failed).map(|wp| wp.id.as_str())
    }

    #[test]
    fn selects_first_pending_with_met_dependencies() {
        let plan = plan_of(vec![
            with_status(waypoint("a"), WaypointStatus::Complete),
            with_deps(waypoint("b"), &["a"]),
            with_deps(waypoint("c"), &["b"]),
        ]);
        assert_eq!(ids(&plan, false), Some("b"));
    }

    #[test]
    fn missing_dependency_blocks_forever() {
        let plan = plan_of(vec![with_deps(waypoint("a"), &["ghost"])]);
        assert_eq!(ids(&plan, false), None);
        let next = build_next_action_after_success(&plan);
        assert_eq!(next.kind, NextActionKind::Pause);
        assert_eq!(next.message.as_deref(), Some("1 waypoint(s) waiting"));
    }

    #[test]
    fn epic_waits_for_children() {
        let plan = plan_of(vec![
            waypoint("epic"),
            child_of(waypoint("c1"), "epic"),
            child_of(with_status(waypoint("c2"), WaypointStatus::Skipped), "epic"),
        ]);
        assert_eq!(ids(&plan, false), Some("c1"));

        let mut plan = plan;
        plan.get_waypoint_mut("c1").expect("c1").status = WaypointStatus::Complete;
        assert_eq!(ids(&plan, false), Some("epic"));
    }

    #[test]
    fn include_failed_resumes_in_plan_order() {
        let plan = plan_of(vec![
            waypoint("a"),
            with_status(waypoint("b"), WaypointStatus::Failed),
            with_status(waypoint("c"), WaypointStatus::InProgress),
        ]);
        assert_eq!(ids(&plan, true), Some("b"));
        assert_eq!(ids(&plan, false), Some("a"));
    }

    #[test]
    fn completion_counts_partition_total() {
        let plan = plan_of(vec![
            with_status(waypoint("a"), WaypointStatus::Complete),
            with_status(waypoint("b"), WaypointStatus::Skipped),
            with_status(waypoint("c"), WaypointStatus::Failed),
            with_deps(waypoint("d"), &["c"]),
            with_status(waypoint("e"), WaypointStatus::InProgress),
            waypoint("f"),
        ]);
        let status = build_completion_status(&plan);
        assert_eq!(status, build_completion_status(&plan));
        assert_eq!(status.complete, 2);
        assert_eq!(status.failed, 1);
        assert_eq!(status.blocked, 1);
        assert_eq!(status.in_progress, 1);
        assert_eq!(status.pending, 1);
        assert_eq!(
            status.complete + status.pending + status.failed + status.blocked + status.in_progress,
            status.total
        );
        assert!(!status.all_complete());
    }

    #[test]
    fn failed_dependency_reports_blocked() {
        let mut plan = plan_of(vec![
            with_status(waypoint("a"), WaypointStatus::Complete),
            with_deps(waypoint("b"), &["a"]),
            with_deps(waypoint("c"), &["b"]),
        ]);
        plan.get_waypoint_mut("b").expect("b").status = WaypointStatus::Failed;
        let status = build_completion_status(&plan);
        assert_eq!(status.blocked, 1);
        let next = build_next_action_after_success(&plan);
        assert_eq!(next.kind, NextActionKind::Pause);
        assert_eq!(
            next.message.as_deref(),
            Some("1 waypoint(s) blocked by failures")
        );
    }

    #[test]
    fn next_action_reports_completion_and_continue() {
        let plan = plan_of(vec![
            with_status(waypoint("a"), WaypointStatus::Complete),
            with_status(waypoint("b"), WaypointStatus::Skipped),
        ]);
        let next = build_next_action_after_success(&plan);
        assert_eq!(next.kind, NextActionKind::Complete);
        assert_eq!(next.message.as_deref(), Some("All waypoints complete!"));

        let plan = plan_of(vec![waypoint("x")]);
        let next = build_next_action_after_success(&plan);
        assert_eq!(next.kind, NextActionKind::Continue);
        assert_eq!(next.waypoint.map(|wp| wp.id), Some("x".to_string()));
    }

    #[test]
    fn resuming_run_picks_up_remaining_failures() {
        let plan = plan_of(vec![
            with_status(waypoint("a"), WaypointStatus::Complete),
            with_status(waypoint("b"), WaypointStatus::Failed),
        ]);
        assert_eq!(
            build_next_action_after_success(&plan).message.as_deref(),
            Some("1 waypoint(s) failed")
        );
        let next = build_next_action(&plan, true);
        assert_eq!(next.kind, NextActionKind::Continue);
        assert_eq!(next.waypoint.map(|wp| wp.id), Some("b".to_string()));
    }

    #[test]
    fn cycles_are_reported_without_panicking() {
        let plan = plan_of(vec![
            with_deps(waypoint("a"), &["b"]),
            with_deps(waypoint("b"), &["a"]),
        ]);
        let errors = validate_dependencies(&plan);
        assert!(!errors.is_empty());
        assert!(errors[0].contains('a') || errors[0].contains('b'));

        let acyclic = plan_of(vec![waypoint("a"), with_deps(waypoint("b"), &["a", "ghost"])]);
        assert!(validate_dependencies(&acyclic).is_empty());
    }

    #[test]
    fn skip_resolution_looks_ahead_without_mutating() {
        let plan = plan_of(vec![
            with_status(waypoint("a"), WaypointStatus::InProgress),
            with_deps(waypoint("b"), &["a"]),
        ]);
        let intervention = Intervention::new(
            InterventionType::TestFailure,
            plan.waypoints[0].clone(),
            10,
            10,
            "tests failed",
        );
        let (status, next) =
            build_intervention_resolution(&plan, &intervention, InterventionAction::Skip, 5, None);
        assert_eq!(status, Some(WaypointStatus::Skipped));
        assert_eq!(next.kind, NextActionKind::Continue);
        assert_eq!(next.waypoint.map(|wp| wp.id), Some("b".to_string()));
        assert_eq!(plan.waypoints[0].status, WaypointStatus::InProgress);
    }

    #[test]
    fn resolution_table_maps_each_action() {
        let plan = plan_of(vec![waypoint("a")]);
        let intervention = Intervention::new(
            InterventionType::ExecutionError,
            plan.waypoints[0].clone(),
            1,
            10,
            "boom",
        );
        let resolve = |action, reference| {
            build_intervention_resolution(&plan, &intervention, action, 7, reference)
        };

        let (status, next) = resolve(InterventionAction::Retry, None);
        assert_eq!(status, Some(WaypointStatus::InProgress));
        assert_eq!(next.kind, NextActionKind::Continue);
        assert_eq!(
            next.message.as_deref(),
            Some("Retrying with 7 more iterations")
        );

        let (status, next) = resolve(InterventionAction::Rollback, Some("proj/a"));
        assert_eq!(status, Some(WaypointStatus::Pending));
        assert_eq!(next.kind, NextActionKind::Pause);
        assert_eq!(next.message.as_deref(), Some("Rollback requested for proj/a"));

        let (status, next) = resolve(InterventionAction::Abort, None);
        assert_eq!(status, Some(WaypointStatus::Failed));
        assert_eq!(next.kind, NextActionKind::Abort);

        let (status, next) = resolve(InterventionAction::Edit, None);
        assert_eq!(status, None);
        assert_eq!(next.kind, NextActionKind::Pause);

        let (status, next) = resolve(InterventionAction::Wait, None);
        assert_eq!(status, Some(WaypointStatus::Pending));
        assert_eq!(next.kind, NextActionKind::Pause);
    }

    #[test]
    fn rerun_and_stale_reset() {
        let mut wp = with_status(waypoint("a"), WaypointStatus::Complete);
        wp.completed_at = Some(chrono::Utc::now());
        assert!(prepare_waypoint_for_rerun(&mut wp));
        assert_eq!(wp.status, WaypointStatus::Pending);
        assert!(wp.completed_at.is_none());
        assert!(!prepare_waypoint_for_rerun(&mut wp));

        let mut plan = plan_of(vec![
            with_status(waypoint("a"), WaypointStatus::InProgress),
            waypoint("b"),
        ]);
        assert!(reset_stale_in_progress(&mut plan));
        assert_eq!(plan.waypoints[0].status, WaypointStatus::Pending);
        assert!(!reset_stale_in_progress(&mut plan));
    }
}
