//! Waypoint and flight plan data model.
//!
//! A [`FlightPlan`] is an ordered list of [`Waypoint`]s. Order matters: the
//! scheduler scans in plan order, so ties are always broken by position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a waypoint. Only the scheduler and execution controller
/// move a waypoint between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Skipped,
}

impl WaypointStatus {
    /// Complete or skipped: the waypoint no longer blocks dependents.
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for WaypointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: String,
    pub title: String,
    pub objective: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Ids that must be complete or skipped before this waypoint may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: WaypointStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Waypoint {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        objective: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            objective: objective.into(),
            acceptance_criteria: Vec::new(),
            parent_id: None,
            dependencies: Vec::new(),
            status: WaypointStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn mark_complete(&mut self) {
        self.status = WaypointStatus::Complete;
        self.completed_at = Some(Utc::now());
    }
}

/// Ordered collection of waypoints for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightPlan {
    pub waypoints: Vec<Waypoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for FlightPlan {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            waypoints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl FlightPlan {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        Self {
            waypoints,
            ..Self::default()
        }
    }

    pub fn get_waypoint(&self, id: &str) -> Option<&Waypoint> {
        self.waypoints.iter().find(|wp| wp.id == id)
    }

    pub fn get_waypoint_mut(&mut self, id: &str) -> Option<&mut Waypoint> {
        self.waypoints.iter_mut().find(|wp| wp.id == id)
    }

    /// Direct children of `parent_id`, in plan order.
    pub fn get_children(&self, parent_id: &str) -> Vec<&Waypoint> {
        self.waypoints
            .iter()
            .filter(|wp| wp.parent_id.as_deref() == Some(parent_id))
            .collect()
    }

    /// A waypoint with at least one child. A childless waypoint is never an epic.
    pub fn is_epic(&self, id: &str) -> bool {
        self.waypoints
            .iter()
            .any(|wp| wp.parent_id.as_deref() == Some(id))
    }

    /// Waypoints that list `id` as a dependency.
    pub fn get_dependents(&self, id: &str) -> Vec<&Waypoint> {
        self.waypoints
            .iter()
            .filter(|wp| wp.dependencies.iter().any(|dep| dep == id))
            .collect()
    }

    pub fn get_root_waypoints(&self) -> Vec<&Waypoint> {
        self.waypoints
            .iter()
            .filter(|wp| wp.parent_id.is_none())
            .collect()
    }

    /// Depth-first traversal: each root followed by its descendants, paired with depth.
    pub fn iterate_in_order(&self) -> Vec<(&Waypoint, usize)> {
        let mut out = Vec::with_capacity(self.waypoints.len());
        for root in self.get_root_waypoints() {
            self.push_subtree(root, 0, &mut out);
        }
        out
    }

    fn push_subtree<'a>(
        &'a self,
        wp: &'a Waypoint,
        depth: usize,
        out: &mut Vec<(&'a Waypoint, usize)>,
    ) {
        // Malformed parent links can form a loop; never revisit.
        if out.iter().any(|(seen, _)| seen.id == wp.id) {
            return;
        }
        out.push((wp, depth));
        for child in self.get_children(&wp.id) {
            self.push_subtree(child, depth + 1, out);
        }
    }

    pub fn add_waypoint(&mut self, waypoint: Waypoint) {
        self.waypoints.push(waypoint);
        self.touch();
    }

    /// Replace the waypoint with the same id. Returns false when absent.
    pub fn update_waypoint(&mut self, waypoint: Waypoint) -> bool {
        match self.waypoints.iter_mut().find(|wp| wp.id == waypoint.id) {
            Some(slot) => {
                *slot = waypoint;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Insert at `index`, clamped to the end of the plan.
    pub fn insert_waypoint_at(&mut self, waypoint: Waypoint, index: usize) {
        let index = index.min(self.waypoints.len());
        self.waypoints.insert(index, waypoint);
        self.touch();
    }

    /// Insert `new` directly after `after_id`, preserving their order.
    pub fn insert_waypoints_after(&mut self, after_id: &str, new: Vec<Waypoint>) -> bool {
        let Some(pos) = self.waypoints.iter().position(|wp| wp.id == after_id) else {
            return false;
        };
        let tail = self.waypoints.split_off(pos + 1);
        self.waypoints.extend(new);
        self.waypoints.extend(tail);
        self.touch();
        true
    }

    /// Remove a waypoint and its descendants, and strip them from every
    /// remaining dependency list. Returns the removed ids.
    pub fn remove_waypoint(&mut self, id: &str) -> Vec<String> {
        if self.get_waypoint(id).is_none() {
            return Vec::new();
        }
        let mut removed = vec![id.to_string()];
        let mut cursor = 0;
        while cursor < removed.len() {
            let parent = removed[cursor].clone();
            for child in self.get_children(&parent) {
                if !removed.contains(&child.id) {
                    removed.push(child.id.clone());
                }
            }
            cursor += 1;
        }
        self.waypoints.retain(|wp| !removed.contains(&wp.id));
        for wp in &mut self.waypoints {
            wp.dependencies.retain(|dep| !removed.contains(dep));
        }
        self.touch();
        removed
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{child_of, plan_of, waypoint, with_deps};

    #[test]
    fn childless_waypoint_is_not_an_epic() {
        let plan = plan_of(vec![waypoint("a"), child_of(waypoint("b"), "a")]);
        assert!(plan.is_epic("a"));
        assert!(!plan.is_epic("b"));
    }

    #[test]
    fn iterate_in_order_walks_roots_then_children() {
        let plan = plan_of(vec![
            waypoint("a"),
            waypoint("b"),
            child_of(waypoint("a1"), "a"),
            child_of(waypoint("a1x"), "a1"),
        ]);
        let order: Vec<(&str, usize)> = plan
            .iterate_in_order()
            .into_iter()
            .map(|(wp, depth)| (wp.id.as_str(), depth))
            .collect();
        assert_eq!(order, vec![("a", 0), ("a1", 1), ("a1x", 2), ("b", 0)]);
    }

    #[test]
    fn insert_after_keeps_relative_order() {
        let mut plan = plan_of(vec![waypoint("a"), waypoint("d")]);
        assert!(plan.insert_waypoints_after("a", vec![waypoint("b"), waypoint("c")]));
        assert!(!plan.insert_waypoints_after("zz", vec![waypoint("e")]));
        let ids: Vec<&str> = plan.waypoints.iter().map(|wp| wp.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn remove_cascades_to_children_and_dependencies() {
        let mut plan = plan_of(vec![
            waypoint("epic"),
            child_of(waypoint("c1"), "epic"),
            with_deps(waypoint("other"), &["c1", "keep"]),
            waypoint("keep"),
        ]);
        let removed = plan.remove_waypoint("epic");
        assert_eq!(removed, vec!["epic".to_string(), "c1".to_string()]);
        let other = plan.get_waypoint("other").expect("other");
        assert_eq!(other.dependencies, vec!["keep".to_string()]);
        assert!(plan.remove_waypoint("missing").is_empty());
    }

    #[test]
    fn dependents_lists_waypoints_that_reference_id() {
        let plan = plan_of(vec![
            waypoint("a"),
            with_deps(waypoint("b"), &["a"]),
            with_deps(waypoint("c"), &["a", "b"]),
        ]);
        let ids: Vec<&str> = plan
            .get_dependents("a")
            .iter()
            .map(|wp| wp.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn status_serializes_snake_case() {
        let raw = serde_json::to_string(&WaypointStatus::InProgress).expect("serialize");
        assert_eq!(raw, "\"in_progress\"");
    }
}
