//! Headless run loop for `waypoints run`.
//!
//! Drives the [`ExecutionController`] until the plan lands, pauses, or a
//! failure stops it under the `--on-error` policy. Each waypoint executes on a
//! background worker; plan, journey and execution log are written from this
//! thread only.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::controller::{ExecutionController, ExecutionDirective};
use crate::core::intervention::{Intervention, InterventionAction, InterventionResult};
use crate::core::waypoint::{Waypoint, WaypointStatus};
use crate::exit_codes;
use crate::io::config::EngineConfig;
use crate::io::execution_log::{ExecutionLog, LogEntry};
use crate::io::executor::{AgentExecutor, ExecutionOutcome, ExecutionProgress};
use crate::io::journey_store::{load_journey, save_journey};
use crate::io::paths::ProjectPaths;
use crate::io::plan_store::{load_flight_plan, save_flight_plan};
use crate::io::repository::{CommitOutcome, RepositoryService, commit_waypoint};
use crate::worker::{WorkerMessage, spawn_execution};

/// How the headless loop resolves interventions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Stop at the first failure.
    #[default]
    Abort,
    /// Carry on with the next waypoint. Escalations are marked skipped;
    /// plain failures stay failed and still fail the run.
    Skip,
    /// Retry a failed waypoint once with extra iterations, then stop.
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub on_error: OnErrorPolicy,
    pub max_iterations: u32,
}

impl RunOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            on_error: config.on_error,
            max_iterations: config.max_iterations,
        }
    }
}

/// Reason `run_project` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every waypoint is complete or skipped.
    Landed,
    /// Nothing runnable remains (blocked, cancelled, waiting).
    Paused(String),
    Failed { waypoint_id: String },
    /// An executor asked for a human under the `abort` policy.
    Intervention {
        waypoint_id: String,
        summary: String,
    },
}

impl RunStop {
    fn label(&self) -> &'static str {
        match self {
            Self::Landed => "landed",
            Self::Paused(_) => "paused",
            Self::Failed { .. } => "failed",
            Self::Intervention { .. } => "intervention",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub execution_id: String,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stop: RunStop,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        match self.stop {
            RunStop::Intervention { .. } => exit_codes::INTERVENTION,
            RunStop::Failed { .. } => exit_codes::FAILED,
            _ if self.failed > 0 => exit_codes::FAILED,
            _ => exit_codes::OK,
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Summary: {} completed, {} failed, {} skipped",
            self.completed, self.failed, self.skipped
        )
    }
}

/// Progress notifications for the caller (printing, UI).
#[derive(Debug)]
pub enum RunEvent<'a> {
    Started(&'a Waypoint),
    Progress(&'a ExecutionProgress),
    Completed {
        waypoint_id: &'a str,
        commit: Option<&'a CommitOutcome>,
    },
    /// The waypoint failed and the run moves on without resolving it.
    Failed {
        waypoint_id: &'a str,
        reason: &'a str,
    },
    Intervention {
        intervention: &'a Intervention,
        action: InterventionAction,
    },
}

/// Execute the project's flight plan headlessly.
#[instrument(skip_all, fields(root = %paths.root.display(), on_error = ?options.on_error))]
pub fn run_project(
    paths: &ProjectPaths,
    config: &EngineConfig,
    options: &RunOptions,
    executor: Arc<dyn AgentExecutor>,
    repository: &dyn RepositoryService,
    mut on_event: impl FnMut(&RunEvent<'_>),
) -> Result<RunSummary> {
    let plan = load_flight_plan(&paths.flight_plan_path)?.ok_or_else(|| {
        anyhow!(
            "no flight plan found at {}",
            paths.flight_plan_path.display()
        )
    })?;
    let journey = load_journey(&paths.journey_path, true)?;
    let slug = journey
        .as_ref()
        .map(|journey| journey.project_slug.clone())
        .unwrap_or_else(|| paths.slug());
    let spec = paths.load_spec()?;
    let log = ExecutionLog::create(&paths.logs_dir, &slug)?;
    info!(execution_id = log.execution_id(), waypoints = plan.waypoints.len(), "run started");

    let mut ctl = ExecutionController::new(plan, journey, options.max_iterations);
    ctl.initialize(options.on_error == OnErrorPolicy::Retry)?;
    persist(paths, &ctl)?;

    let mut completed = 0;
    let mut failed = 0;
    let mut skipped = 0;
    let mut retried: HashSet<String> = HashSet::new();

    let mut directive = ctl.start(None)?;
    let stop = loop {
        let waypoint = match directive {
            ExecutionDirective::Execute(waypoint) => waypoint,
            ExecutionDirective::Land => break RunStop::Landed,
            ExecutionDirective::Pause(message) | ExecutionDirective::Noop(message) => {
                break RunStop::Paused(message);
            }
            ExecutionDirective::Intervention(intervention) => {
                break RunStop::Intervention {
                    waypoint_id: intervention.waypoint.id.clone(),
                    summary: intervention.error_summary.clone(),
                };
            }
        };
        persist(paths, &ctl)?;
        on_event(&RunEvent::Started(&waypoint));
        log.append(LogEntry::WaypointStarted {
            waypoint_id: waypoint.id.clone(),
            title: waypoint.title.clone(),
        })?;

        let budget = options.max_iterations + ctl.consume_additional_iterations();
        let started = Instant::now();
        let outcome =
            execute_on_worker(executor.clone(), &waypoint, &spec, budget, &log, &mut on_event)?;
        let succeeded = outcome == ExecutionOutcome::Success;
        let requested_human = matches!(outcome, ExecutionOutcome::InterventionNeeded(_));
        let plain_failure = matches!(outcome, ExecutionOutcome::Failed(_));
        directive = ctl.handle_execution_result(&waypoint.id, outcome)?;

        if succeeded {
            completed += 1;
            log.append(LogEntry::WaypointFinished {
                waypoint_id: waypoint.id.clone(),
                status: WaypointStatus::Complete,
                duration_ms: millis(started),
            })?;
            persist(paths, &ctl)?;
            let commit = config
                .git
                .auto_commit
                .then(|| commit_waypoint(repository, &slug, &waypoint));
            on_event(&RunEvent::Completed {
                waypoint_id: &waypoint.id,
                commit: commit.as_ref(),
            });
        }

        let pending = match &directive {
            ExecutionDirective::Intervention(intervention) => Some(intervention.as_ref().clone()),
            _ => None,
        };
        if let Some(intervention) = pending {
            log.append(LogEntry::Intervention {
                waypoint_id: waypoint.id.clone(),
                intervention_type: intervention.kind,
                error_summary: intervention.error_summary.clone(),
                suggested_action: intervention.suggested_action(),
            })?;
            if options.on_error == OnErrorPolicy::Skip && plain_failure {
                failed += 1;
                on_event(&RunEvent::Failed {
                    waypoint_id: &waypoint.id,
                    reason: &intervention.error_summary,
                });
                directive = ctl.continue_after_failure()?;
                log.append(LogEntry::WaypointFinished {
                    waypoint_id: waypoint.id.clone(),
                    status: WaypointStatus::Failed,
                    duration_ms: millis(started),
                })?;
                persist(paths, &ctl)?;
                continue;
            }

            let action = match options.on_error {
                OnErrorPolicy::Abort => InterventionAction::Abort,
                OnErrorPolicy::Skip => InterventionAction::Skip,
                OnErrorPolicy::Retry if retried.insert(waypoint.id.clone()) => {
                    InterventionAction::Retry
                }
                OnErrorPolicy::Retry => InterventionAction::Abort,
            };
            on_event(&RunEvent::Intervention {
                intervention: &intervention,
                action,
            });

            directive = ctl.resolve_intervention(&InterventionResult::new(action), repository)?;
            log.append(LogEntry::Resolution {
                waypoint_id: waypoint.id.clone(),
                action,
                message: directive_message(&directive),
            })?;

            match action {
                InterventionAction::Skip => {
                    skipped += 1;
                    log.append(LogEntry::WaypointFinished {
                        waypoint_id: waypoint.id.clone(),
                        status: WaypointStatus::Skipped,
                        duration_ms: millis(started),
                    })?;
                }
                InterventionAction::Abort => {
                    failed += 1;
                    log.append(LogEntry::WaypointFinished {
                        waypoint_id: waypoint.id.clone(),
                        status: WaypointStatus::Failed,
                        duration_ms: millis(started),
                    })?;
                    persist(paths, &ctl)?;
                    if options.on_error == OnErrorPolicy::Abort && requested_human {
                        break RunStop::Intervention {
                            waypoint_id: waypoint.id.clone(),
                            summary: intervention.error_summary,
                        };
                    }
                    break RunStop::Failed {
                        waypoint_id: waypoint.id.clone(),
                    };
                }
                _ => {}
            }
        }
        persist(paths, &ctl)?;
    };
    persist(paths, &ctl)?;

    let summary = RunSummary {
        execution_id: log.execution_id().to_string(),
        completed,
        failed,
        skipped,
        stop,
    };
    log.append(LogEntry::RunFinished {
        completed,
        failed,
        skipped,
        stop: summary.stop.label().to_string(),
    })?;
    info!(
        completed,
        failed,
        skipped,
        stop = summary.stop.label(),
        "run finished"
    );
    Ok(summary)
}

fn execute_on_worker(
    executor: Arc<dyn AgentExecutor>,
    waypoint: &Waypoint,
    spec: &str,
    max_iterations: u32,
    log: &ExecutionLog,
    on_event: &mut impl FnMut(&RunEvent<'_>),
) -> Result<ExecutionOutcome> {
    let handle = spawn_execution(executor, waypoint.clone(), spec.to_string(), max_iterations)?;
    let mut outcome = None;
    while let Some(message) = handle.recv() {
        match message {
            WorkerMessage::Progress { progress, .. } => {
                if let Some(entry) = progress_entry(&waypoint.id, &progress) {
                    log.append(entry)?;
                }
                on_event(&RunEvent::Progress(&progress));
            }
            WorkerMessage::Finished { outcome: done, .. } => outcome = Some(done),
        }
    }
    if let Err(err) = handle.join() {
        warn!(err = %err, "execution worker did not exit cleanly");
    }
    Ok(outcome.unwrap_or_else(|| {
        ExecutionOutcome::Failed("execution worker exited without a result".to_string())
    }))
}

fn progress_entry(waypoint_id: &str, progress: &ExecutionProgress) -> Option<LogEntry> {
    match progress {
        ExecutionProgress::Iteration {
            iteration,
            max_iterations,
        } => Some(LogEntry::Iteration {
            waypoint_id: waypoint_id.to_string(),
            iteration: *iteration,
            max_iterations: *max_iterations,
        }),
        ExecutionProgress::Command {
            command,
            exit_code,
            timed_out,
            attempts,
            duration,
        } => Some(LogEntry::Command {
            waypoint_id: Some(waypoint_id.to_string()),
            command: command.clone(),
            exit_code: *exit_code,
            timed_out: *timed_out,
            attempts: *attempts,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }),
        ExecutionProgress::WorkspaceDiff(summary) => Some(LogEntry::WorkspaceDiff {
            waypoint_id: waypoint_id.to_string(),
            summary: summary.clone(),
        }),
        ExecutionProgress::CommandEvent(_) => None,
    }
}

fn directive_message(directive: &ExecutionDirective) -> Option<String> {
    match directive {
        ExecutionDirective::Pause(message) | ExecutionDirective::Noop(message) => {
            Some(message.clone())
        }
        ExecutionDirective::Execute(wp) => Some(format!("Executing {}", wp.id)),
        ExecutionDirective::Land => Some("All waypoints complete!".to_string()),
        ExecutionDirective::Intervention(_) => None,
    }
}

fn persist(paths: &ProjectPaths, ctl: &ExecutionController) -> Result<()> {
    save_flight_plan(&paths.flight_plan_path, ctl.plan())?;
    if let Some(journey) = ctl.journey() {
        save_journey(&paths.journey_path, journey)?;
    }
    Ok(())
}

fn millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
