//! Agent executor abstraction.
//!
//! The [`AgentExecutor`] trait decouples the run loop from whatever actually
//! does a waypoint's work. [`CommandExecutor`] runs a configured command once
//! per iteration; tests use scripted executors that return predetermined
//! outcomes without spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::intervention::{
    Intervention, InterventionType, classify_failure_output, extract_intervention_reason,
    needs_user_intervention,
};
use crate::core::provenance::{WorkspaceDiffSummary, summarize_workspace_diff};
use crate::core::timeout_policy::TimeoutDomain;
use crate::core::waypoint::Waypoint;
use crate::io::command_runner::{CommandEvent, CommandResult, CommandRunner, CommandSpec};
use crate::io::snapshot::capture_workspace_snapshot;

/// Exit code a waypoint command uses to ask for another iteration.
pub const CONTINUE_EXIT_CODE: i32 = 3;

/// How one waypoint execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success,
    Failed(String),
    Cancelled,
    InterventionNeeded(Box<Intervention>),
    MaxIterations,
}

/// Progress reported while a waypoint executes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionProgress {
    Iteration {
        iteration: u32,
        max_iterations: u32,
    },
    Command {
        command: String,
        exit_code: i32,
        timed_out: bool,
        attempts: usize,
        duration: Duration,
    },
    CommandEvent(CommandEvent),
    WorkspaceDiff(WorkspaceDiffSummary),
}

/// Abstraction over waypoint execution backends.
///
/// `Err` is reserved for infrastructure failures (e.g. the command cannot be
/// launched). Everything the work itself produces is an [`ExecutionOutcome`].
pub trait AgentExecutor: Send + Sync {
    fn execute(
        &self,
        waypoint: &Waypoint,
        spec: &str,
        max_iterations: u32,
        progress: &mut dyn FnMut(ExecutionProgress),
    ) -> Result<ExecutionOutcome>;
}

/// Runs `argv` in the project root once per iteration.
///
/// Exit 0 completes the waypoint, [`CONTINUE_EXIT_CODE`] asks for another
/// iteration, anything else is classified into an intervention.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    root: PathBuf,
    argv: Vec<String>,
    domain: TimeoutDomain,
    runner: CommandRunner,
}

impl CommandExecutor {
    pub fn new(
        root: impl Into<PathBuf>,
        argv: Vec<String>,
        domain: TimeoutDomain,
        runner: CommandRunner,
    ) -> Self {
        Self {
            root: root.into(),
            argv,
            domain,
            runner,
        }
    }

    fn command_for(
        &self,
        waypoint: &Waypoint,
        spec: &str,
        iteration: u32,
        max_iterations: u32,
    ) -> Result<CommandSpec> {
        Ok(CommandSpec::from_argv(self.domain, &self.argv)
            .context("executor.command is not configured")?
            .cwd(&self.root)
            .category("waypoint")
            .env("WAYPOINT_ID", &waypoint.id)
            .env("WAYPOINT_TITLE", &waypoint.title)
            .env("WAYPOINT_OBJECTIVE", &waypoint.objective)
            .env(
                "WAYPOINT_ACCEPTANCE_CRITERIA",
                waypoint.acceptance_criteria.join("\n"),
            )
            .env("WAYPOINT_ITERATION", iteration.to_string())
            .env("WAYPOINT_MAX_ITERATIONS", max_iterations.to_string())
            .env("WAYPOINT_SPEC", spec)
            .env("WAYPOINT_PROJECT_ROOT", self.root.display().to_string()))
    }
}

impl AgentExecutor for CommandExecutor {
    #[instrument(skip_all, fields(waypoint_id = %waypoint.id, max_iterations))]
    fn execute(
        &self,
        waypoint: &Waypoint,
        spec: &str,
        max_iterations: u32,
        progress: &mut dyn FnMut(ExecutionProgress),
    ) -> Result<ExecutionOutcome> {
        let before = capture_workspace_snapshot(&self.root)?;
        let mut outcome = ExecutionOutcome::MaxIterations;
        for iteration in 1..=max_iterations {
            progress(ExecutionProgress::Iteration {
                iteration,
                max_iterations,
            });
            let command = self.command_for(waypoint, spec, iteration, max_iterations)?;
            let result = self
                .runner
                .run(&command, |event| {
                    progress(ExecutionProgress::CommandEvent(event.clone()));
                })?;
            progress(ExecutionProgress::Command {
                command: result.command.clone(),
                exit_code: result.effective_exit_code(),
                timed_out: result.timed_out(),
                attempts: result.attempts.len(),
                duration: result.total_duration,
            });

            match interpret(waypoint, &result, iteration, max_iterations) {
                Some(done) => {
                    outcome = done;
                    break;
                }
                None => debug!(iteration, "waypoint command requested another iteration"),
            }
        }

        match capture_workspace_snapshot(&self.root) {
            Ok(after) => progress(ExecutionProgress::WorkspaceDiff(summarize_workspace_diff(
                &before, &after,
            ))),
            Err(err) => warn!(err = %format!("{err:#}"), "workspace snapshot failed"),
        }
        info!(outcome = ?outcome_label(&outcome), "waypoint execution finished");
        Ok(outcome)
    }
}

/// `None` means run another iteration.
fn interpret(
    waypoint: &Waypoint,
    result: &CommandResult,
    iteration: u32,
    max_iterations: u32,
) -> Option<ExecutionOutcome> {
    let combined = format!("{}\n{}", result.stdout(), result.stderr());
    if needs_user_intervention(&combined) {
        let intervention = Intervention::new(
            InterventionType::UserRequested,
            waypoint.clone(),
            iteration,
            max_iterations,
            extract_intervention_reason(&combined),
        );
        return Some(ExecutionOutcome::InterventionNeeded(Box::new(intervention)));
    }
    if result.succeeded() {
        return Some(ExecutionOutcome::Success);
    }
    if result.exit_code() == Some(CONTINUE_EXIT_CODE) {
        return None;
    }
    if result.exit_code().is_none() && !result.timed_out() {
        return Some(ExecutionOutcome::Cancelled);
    }

    let (kind, summary) = if result.timed_out() {
        (
            InterventionType::ExecutionError,
            format!("Command timed out: {}", result.command),
        )
    } else {
        classify_failure_output(&combined)
    };
    if kind == InterventionType::ExecutionError && !result.timed_out() {
        return Some(ExecutionOutcome::Failed(summary));
    }
    let intervention = Intervention::new(kind, waypoint.clone(), iteration, max_iterations, summary)
        .with_context("exit_code", result.effective_exit_code().to_string())
        .with_context("command", result.command.clone());
    Some(ExecutionOutcome::InterventionNeeded(Box::new(intervention)))
}

fn outcome_label(outcome: &ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Success => "success",
        ExecutionOutcome::Failed(_) => "failed",
        ExecutionOutcome::Cancelled => "cancelled",
        ExecutionOutcome::InterventionNeeded(_) => "intervention_needed",
        ExecutionOutcome::MaxIterations => "max_iterations",
    }
}
