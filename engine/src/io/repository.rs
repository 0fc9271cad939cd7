//! Repository side effects (git).
//!
//! Every call is fallible and never retried. Failures come back as
//! [`RepoResult`] values so callers can log them and keep scheduling.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::timeout_policy::TimeoutDomain;
use crate::core::waypoint::Waypoint;
use crate::io::command_runner::{CommandResult, CommandRunner, CommandSpec};

/// Outcome of one repository operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoResult {
    pub success: bool,
    pub message: String,
}

impl RepoResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub trait RepositoryService {
    fn is_repo(&self) -> bool;
    /// Initialize a repository and write a default `.gitignore`.
    fn init(&self) -> RepoResult;
    /// Stage all changes.
    fn stage(&self) -> RepoResult;
    /// Commit staged changes. Nothing to commit is a success.
    fn commit(&self, message: &str) -> RepoResult;
    fn tag(&self, name: &str) -> RepoResult;
    /// Discard uncommitted changes and move HEAD to `reference`.
    fn reset_hard(&self, reference: &str) -> RepoResult;
    fn head_commit(&self) -> Option<String>;
}

pub const DEFAULT_GITIGNORE: &str = "\
# Engine diagnostics
.waypoints/debug.log
.waypoints/**/debug.log

# Build artifacts
target/
build/
dist/
out/

# Dependencies
node_modules/
vendor/
.venv/
venv/
__pycache__/

# Editors and OS
.idea/
.vscode/
*.swp
.DS_Store
";

/// `git` subprocesses run through the command runner under the
/// `git_operation` timeout domain.
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
    runner: CommandRunner,
}

impl GitRepository {
    pub fn new(workdir: impl Into<PathBuf>, runner: CommandRunner) -> Self {
        Self {
            workdir: workdir.into(),
            runner,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_checked(&["diff", "--cached", "--name-only"])?;
        Ok(!out.stdout().trim().is_empty())
    }

    fn write_gitignore(&self) -> Result<()> {
        let path = self.workdir.join(".gitignore");
        if !path.exists() {
            fs::write(&path, DEFAULT_GITIGNORE)?;
            info!(path = %path.display(), "created .gitignore");
            return Ok(());
        }
        let existing = fs::read_to_string(&path)?;
        if !existing.contains(".waypoints/debug.log") {
            fs::write(&path, format!("{existing}\n{DEFAULT_GITIGNORE}"))?;
            info!(path = %path.display(), "appended to .gitignore");
        }
        Ok(())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandResult> {
        let output = self.run(args)?;
        if !output.succeeded() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr().trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandResult> {
        let spec = CommandSpec::new(TimeoutDomain::GitOperation, "git")
            .args(args.iter().copied())
            .cwd(&self.workdir);
        self.runner.run(&spec, |_| {})
    }
}

impl RepositoryService for GitRepository {
    fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .is_ok_and(|out| out.succeeded() && out.stdout().trim() == "true")
    }

    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn init(&self) -> RepoResult {
        if self.is_repo() {
            return RepoResult::ok("Already a git repository");
        }
        if let Err(err) = self.run_checked(&["init"]) {
            return RepoResult::failed(format!("Failed to initialize: {err:#}"));
        }
        if let Err(err) = self.write_gitignore() {
            warn!(err = %err, "failed to write .gitignore");
        }
        info!("initialized git repository");
        RepoResult::ok("Initialized git repository")
    }

    fn stage(&self) -> RepoResult {
        match self.run_checked(&["add", "-A"]) {
            Ok(_) => RepoResult::ok("Staged all changes"),
            Err(err) => RepoResult::failed(format!("Stage failed: {err:#}")),
        }
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> RepoResult {
        match self.has_staged_changes() {
            Ok(false) => {
                debug!("no staged changes, skipping commit");
                return RepoResult::ok("Nothing to commit");
            }
            Ok(true) => {}
            Err(err) => return RepoResult::failed(format!("Commit failed: {err:#}")),
        }
        match self.run(&["commit", "-m", message]) {
            Ok(out) if out.succeeded() => {
                info!(commit_message = message, "created commit");
                RepoResult::ok(format!("Committed: {message}"))
            }
            Ok(out) if format!("{}{}", out.stdout(), out.stderr()).contains("nothing to commit") => {
                RepoResult::ok("Nothing to commit")
            }
            Ok(out) => RepoResult::failed(format!("Commit failed: {}", out.stderr().trim())),
            Err(err) => RepoResult::failed(format!("Commit failed: {err:#}")),
        }
    }

    #[instrument(skip_all, fields(name))]
    fn tag(&self, name: &str) -> RepoResult {
        if let Ok(existing) = self.run_checked(&["tag", "-l", name])
            && existing.stdout().lines().any(|line| line.trim() == name)
        {
            warn!(name, "tag already exists");
            return RepoResult::ok(format!("Tag already exists: {name}"));
        }
        match self.run_checked(&["tag", "-a", name, "-m", name]) {
            Ok(_) => {
                info!(name, "created tag");
                RepoResult::ok(format!("Created tag: {name}"))
            }
            Err(err) => RepoResult::failed(format!("Tag failed: {err:#}")),
        }
    }

    #[instrument(skip_all, fields(reference))]
    fn reset_hard(&self, reference: &str) -> RepoResult {
        if self.run_checked(&["rev-parse", "--verify", reference]).is_err() {
            return RepoResult::failed(format!("Target not found: {reference}"));
        }
        match self.run_checked(&["reset", "--hard", reference]) {
            Ok(_) => {
                info!(reference, "reset working tree");
                RepoResult::ok(format!("Reset to {reference}"))
            }
            Err(err) => RepoResult::failed(format!("Reset failed: {err:#}")),
        }
    }

    fn head_commit(&self) -> Option<String> {
        self.run_checked(&["rev-parse", "--short", "HEAD"])
            .inspect_err(|err| debug!(err = %err, "no HEAD commit"))
            .ok()
            .map(|out| out.stdout().trim().to_string())
            .filter(|sha| !sha.is_empty())
    }
}

/// What happened when recording a completed waypoint in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: bool,
    pub commit: Option<String>,
    pub tag: Option<String>,
    pub message: String,
}

pub fn commit_message(project_slug: &str, waypoint: &Waypoint) -> String {
    format!("feat({project_slug}): Complete {}", waypoint.title)
}

pub fn waypoint_tag(project_slug: &str, waypoint: &Waypoint) -> String {
    format!("{project_slug}/{}", waypoint.id)
}

/// Stage, commit and tag a completed waypoint.
///
/// Any failure is logged and reported with `committed: false`; it never stops
/// the run.
#[instrument(skip_all, fields(waypoint_id = %waypoint.id))]
pub fn commit_waypoint(
    repo: &dyn RepositoryService,
    project_slug: &str,
    waypoint: &Waypoint,
) -> CommitOutcome {
    let skipped = |message: String| {
        warn!(reason = %message, "skipping waypoint commit");
        CommitOutcome {
            committed: false,
            commit: None,
            tag: None,
            message,
        }
    };
    if !repo.is_repo() {
        return skipped("Not a git repository".to_string());
    }
    let staged = repo.stage();
    if !staged.success {
        return skipped(staged.message);
    }
    let message = commit_message(project_slug, waypoint);
    let committed = repo.commit(&message);
    if !committed.success {
        return skipped(committed.message);
    }
    let tag_name = waypoint_tag(project_slug, waypoint);
    let tagged = repo.tag(&tag_name);
    if !tagged.success {
        warn!(tag = %tag_name, reason = %tagged.message, "tag failed");
    }
    CommitOutcome {
        committed: true,
        commit: repo.head_commit(),
        tag: tagged.success.then_some(tag_name),
        message: committed.message,
    }
}
