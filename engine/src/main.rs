//! `waypoints`: headless driver for a project's flight plan.
//!
//! Operates on a project directory holding `.waypoints/flight-plan.jsonl`.
//! `run` executes waypoints through the configured executor command; the
//! other subcommands inspect or repair on-disk state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use waypoint_engine::core::scheduler::{
    build_completion_status, reset_stale_in_progress, select_next_waypoint_candidate,
    validate_dependencies,
};
use waypoint_engine::core::timeout_policy::{TimeoutDomain, TimeoutPolicyRegistry};
use waypoint_engine::exit_codes;
use waypoint_engine::io::command_runner::{CommandEvent, CommandRunner, CommandSpec};
use waypoint_engine::io::config::{EngineConfig, load_config};
use waypoint_engine::io::executor::{CommandExecutor, ExecutionProgress};
use waypoint_engine::io::history_store::TimeoutHistoryStore;
use waypoint_engine::io::journey_store::{load_journey, save_journey};
use waypoint_engine::io::paths::ProjectPaths;
use waypoint_engine::io::plan_store::{load_flight_plan, save_flight_plan};
use waypoint_engine::io::repository::GitRepository;
use waypoint_engine::logging;
use waypoint_engine::run::{OnErrorPolicy, RunEvent, RunOptions, RunStop, run_project};

#[derive(Parser)]
#[command(
    name = "waypoints",
    version,
    about = "Execute a project's flight plan one waypoint at a time"
)]
struct Cli {
    /// Project directory.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Debug-level diagnostics on stderr (ignored when RUST_LOG is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute waypoints until the plan lands or a failure stops the run.
    Run {
        /// What to do when a waypoint fails (defaults to the config value).
        #[arg(long, value_enum)]
        on_error: Option<OnErrorPolicy>,
        /// Iteration budget per waypoint (defaults to the config value).
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Print completion counts and the next candidate.
    Status,
    /// Check the dependency graph for cycles.
    Validate,
    /// Recover the journey and reset waypoints left in progress.
    Recover,
    /// Run one command under a timeout domain with the shared history.
    Exec {
        /// Timeout domain (e.g. host_validation, git_operation).
        #[arg(long)]
        domain: TimeoutDomain,
        /// Optional category used in the history key.
        #[arg(long)]
        category: Option<String>,
        /// Explicit timeout in seconds (clamped to the domain bounds).
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let paths = ProjectPaths::new(&cli.project);
    match cli.command {
        Command::Run {
            on_error,
            max_iterations,
        } => cmd_run(&paths, on_error, max_iterations),
        Command::Status => cmd_status(&paths),
        Command::Validate => cmd_validate(&paths),
        Command::Recover => cmd_recover(&paths),
        Command::Exec {
            domain,
            category,
            timeout,
            argv,
        } => cmd_exec(&paths, domain, category, timeout, &argv),
    }
}

fn command_runner(paths: &ProjectPaths, config: &EngineConfig) -> CommandRunner {
    let history = TimeoutHistoryStore::open(
        &config.history_path(paths),
        config.history.autosave_every,
    );
    CommandRunner::new(
        TimeoutPolicyRegistry::default(),
        Arc::new(history),
        config.output_limit_bytes,
    )
}

fn cmd_run(
    paths: &ProjectPaths,
    on_error: Option<OnErrorPolicy>,
    max_iterations: Option<u32>,
) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    if config.executor.command.is_empty() {
        bail!(
            "executor.command is not configured in {}",
            paths.config_path.display()
        );
    }
    let mut options = RunOptions::from_config(&config);
    if let Some(on_error) = on_error {
        options.on_error = on_error;
    }
    if let Some(max_iterations) = max_iterations {
        if max_iterations == 0 {
            bail!("--max-iterations must be > 0");
        }
        options.max_iterations = max_iterations;
    }

    let runner = command_runner(paths, &config);
    let executor = CommandExecutor::new(
        &paths.root,
        config.executor.command.clone(),
        config.executor.domain,
        runner.clone(),
    );
    let repository = GitRepository::new(&paths.root, runner.clone());

    println!("Project: {}", paths.slug());
    let summary = run_project(
        paths,
        &config,
        &options,
        Arc::new(executor),
        &repository,
        print_event,
    )?;
    if let Err(err) = runner.history().flush() {
        eprintln!("warning: could not save timeout history: {err:#}");
    }

    println!();
    match &summary.stop {
        RunStop::Landed => println!("All waypoints complete!"),
        RunStop::Paused(message) => println!("Stopped: {message}"),
        RunStop::Failed { waypoint_id } => {
            println!("Stopped after {waypoint_id} failed");
        }
        RunStop::Intervention { waypoint_id, .. } => {
            println!("Aborting due to intervention on {waypoint_id} (--on-error=abort)");
        }
    }
    println!("{}", summary.summary_line());
    Ok(summary.exit_code())
}

fn print_event(event: &RunEvent<'_>) {
    match event {
        RunEvent::Started(wp) => println!("Executing: {} - {}", wp.id, wp.title),
        RunEvent::Progress(ExecutionProgress::Iteration {
            iteration,
            max_iterations,
        }) => println!("  iteration {iteration}/{max_iterations}"),
        RunEvent::Progress(ExecutionProgress::CommandEvent(CommandEvent::Retry {
            attempt,
            next_timeout,
        })) => println!(
            "  attempt {attempt} timed out, retrying with {}s",
            next_timeout.as_secs()
        ),
        RunEvent::Progress(_) => {}
        RunEvent::Completed { commit, .. } => {
            println!("  ✓ Completed");
            if let Some(commit) = commit {
                if commit.committed {
                    println!("  {}", commit.message);
                } else {
                    println!("  (not committed: {})", commit.message);
                }
            }
        }
        RunEvent::Failed { reason, .. } => {
            println!("  ✗ Failed: {reason}");
            println!("  Continuing with the next waypoint");
        }
        RunEvent::Intervention {
            intervention,
            action,
        } => {
            eprintln!(
                "  ⚠ Intervention needed ({}): {}",
                intervention.kind, intervention.error_summary
            );
            println!("  Resolving with {action}");
        }
    }
}

fn load_plan(paths: &ProjectPaths) -> Result<waypoint_engine::core::waypoint::FlightPlan> {
    load_flight_plan(&paths.flight_plan_path)?.with_context(|| {
        format!(
            "no flight plan found at {}",
            paths.flight_plan_path.display()
        )
    })
}

fn cmd_status(paths: &ProjectPaths) -> Result<i32> {
    let plan = load_plan(paths)?;
    let status = build_completion_status(&plan);
    println!(
        "{} total: {} complete, {} pending, {} in progress, {} failed, {} blocked",
        status.total,
        status.complete,
        status.pending,
        status.in_progress,
        status.failed,
        status.blocked
    );
    if let Some(journey) = load_journey(&paths.journey_path, false)? {
        println!("Journey: {} ({})", journey.state, journey.phase());
    }
    match select_next_waypoint_candidate(&plan, false) {
        Some(wp) => println!("Next: {} - {}", wp.id, wp.title),
        None if status.all_complete() => println!("Next: none (all waypoints complete)"),
        None => println!("Next: none runnable"),
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(paths: &ProjectPaths) -> Result<i32> {
    let plan = load_plan(paths)?;
    let errors = validate_dependencies(&plan);
    if errors.is_empty() {
        println!("OK: {} waypoints, no dependency cycles", plan.waypoints.len());
        return Ok(exit_codes::OK);
    }
    for error in &errors {
        println!("{error}");
    }
    Ok(exit_codes::FAILED)
}

fn cmd_recover(paths: &ProjectPaths) -> Result<i32> {
    if let Some(journey) = load_journey(&paths.journey_path, false)? {
        let recovered = journey.recover();
        if recovered.state != journey.state {
            save_journey(&paths.journey_path, &recovered)?;
            println!("Journey: {} -> {}", journey.state, recovered.state);
        } else {
            println!("Journey: {} (no recovery needed)", journey.state);
        }
    }
    if let Some(mut plan) = load_flight_plan(&paths.flight_plan_path)? {
        if reset_stale_in_progress(&mut plan) {
            plan.updated_at = chrono::Utc::now();
            save_flight_plan(&paths.flight_plan_path, &plan)?;
            println!("Reset in-progress waypoints to pending");
        } else {
            println!("No in-progress waypoints");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_exec(
    paths: &ProjectPaths,
    domain: TimeoutDomain,
    category: Option<String>,
    timeout: Option<u64>,
    argv: &[String],
) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let runner = command_runner(paths, &config);
    let mut spec = CommandSpec::from_argv(domain, argv)?.cwd(&paths.root);
    if let Some(category) = category {
        spec = spec.category(category);
    }
    if let Some(seconds) = timeout {
        spec = spec.timeout(Duration::from_secs(seconds));
    }

    let result = runner.run(&spec, |event| match event {
        CommandEvent::Warning { attempt, elapsed } => {
            eprintln!("attempt {attempt}: still running after {}s", elapsed.as_secs());
        }
        CommandEvent::Terminate { attempt, signal } | CommandEvent::Kill { attempt, signal } => {
            eprintln!("attempt {attempt}: sent {}", signal.as_str());
        }
        CommandEvent::Retry {
            attempt,
            next_timeout,
        } => eprintln!(
            "attempt {attempt} timed out; retrying with {}s",
            next_timeout.as_secs()
        ),
    })?;
    runner.history().flush()?;

    print!("{}", result.stdout());
    eprint!("{}", result.stderr());
    let stats = runner.history().stats(&result.key)?;
    eprintln!(
        "exit={} timed_out={} attempts={} duration={:.1}s history_runs={} history_timeouts={}",
        result.effective_exit_code(),
        result.timed_out(),
        result.attempts.len(),
        result.total_duration.as_secs_f64(),
        stats.runs,
        stats.timeout_count
    );
    Ok(result.effective_exit_code())
}
