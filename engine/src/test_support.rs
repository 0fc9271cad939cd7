//! Test-only helpers: waypoint/plan builders and scripted fakes for the
//! executor and repository seams.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::core::waypoint::{FlightPlan, Waypoint, WaypointStatus};
use crate::io::executor::{AgentExecutor, ExecutionOutcome, ExecutionProgress};
use crate::io::repository::{RepoResult, RepositoryService};

/// Create a pending waypoint with deterministic title and objective.
pub fn waypoint(id: &str) -> Waypoint {
    Waypoint::new(id, format!("{id} title"), format!("{id} objective"))
}

pub fn with_status(mut waypoint: Waypoint, status: WaypointStatus) -> Waypoint {
    waypoint.status = status;
    waypoint
}

pub fn with_deps(mut waypoint: Waypoint, deps: &[&str]) -> Waypoint {
    waypoint.dependencies = deps.iter().map(|dep| (*dep).to_string()).collect();
    waypoint
}

pub fn child_of(mut waypoint: Waypoint, parent_id: &str) -> Waypoint {
    waypoint.parent_id = Some(parent_id.to_string());
    waypoint
}

pub fn plan_of(waypoints: Vec<Waypoint>) -> FlightPlan {
    FlightPlan::new(waypoints)
}

/// One recorded `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCall {
    pub waypoint_id: String,
    pub spec: String,
    pub max_iterations: u32,
}

/// Executor that returns queued outcomes in order.
///
/// Each call reports one `Iteration` progress event. Running out of outcomes
/// is an error.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    calls: Mutex<Vec<ExecutorCall>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.lock().map(|o| o.len()).unwrap_or_default()
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn execute(
        &self,
        waypoint: &Waypoint,
        spec: &str,
        max_iterations: u32,
        progress: &mut dyn FnMut(ExecutionProgress),
    ) -> Result<ExecutionOutcome> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("executor calls poisoned"))?
            .push(ExecutorCall {
                waypoint_id: waypoint.id.clone(),
                spec: spec.to_string(),
                max_iterations,
            });
        progress(ExecutionProgress::Iteration {
            iteration: 1,
            max_iterations,
        });
        self.outcomes
            .lock()
            .map_err(|_| anyhow!("executor outcomes poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted outcome for {}", waypoint.id))
    }
}

/// Repository fake that records every call.
///
/// Calls are recorded as `"is_repo"`, `"stage"`, `"commit {message}"`,
/// `"tag {name}"`, `"reset_hard {reference}"`, `"head_commit"` and `"init"`.
#[derive(Debug)]
pub struct RecordingRepository {
    pub is_repo: bool,
    pub fail_commit: bool,
    pub fail_reset: bool,
    calls: RefCell<Vec<String>>,
}

impl Default for RecordingRepository {
    fn default() -> Self {
        Self {
            is_repo: true,
            fail_commit: false,
            fail_reset: false,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl RecordingRepository {
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn failing_reset(mut self) -> Self {
        self.fail_reset = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }
}

impl RepositoryService for RecordingRepository {
    fn is_repo(&self) -> bool {
        self.record("is_repo");
        self.is_repo
    }

    fn init(&self) -> RepoResult {
        self.record("init");
        RepoResult::ok("Initialized git repository")
    }

    fn stage(&self) -> RepoResult {
        self.record("stage");
        RepoResult::ok("Staged all changes")
    }

    fn commit(&self, message: &str) -> RepoResult {
        self.record(format!("commit {message}"));
        if self.fail_commit {
            return RepoResult::failed("Commit failed: scripted");
        }
        RepoResult::ok(format!("Committed: {message}"))
    }

    fn tag(&self, name: &str) -> RepoResult {
        self.record(format!("tag {name}"));
        RepoResult::ok(format!("Created tag: {name}"))
    }

    fn reset_hard(&self, reference: &str) -> RepoResult {
        self.record(format!("reset_hard {reference}"));
        if self.fail_reset {
            return RepoResult::failed(format!("Target not found: {reference}"));
        }
        RepoResult::ok(format!("Reset to {reference}"))
    }

    fn head_commit(&self) -> Option<String> {
        self.record("head_commit");
        Some("abc1234".to_string())
    }
}
