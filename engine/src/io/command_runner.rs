//! Policy-driven command execution.
//!
//! [`CommandRunner`] resolves a timeout per attempt from the domain policy and
//! the shared history, supervises the child with [`run_supervised`], records
//! the outcome, and retries only timeouts the policy allows.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::timeout_policy::{TimeoutContext, TimeoutDomain, TimeoutPolicyRegistry};
use crate::io::history_store::TimeoutHistoryStore;
use crate::io::process::{ProcessStage, StagedTimeout, TerminationSignal, run_supervised};

/// Exit code reported for a command that timed out without one.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Progress events delivered to the observer passed to [`CommandRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    Warning {
        attempt: u32,
        elapsed: Duration,
    },
    Terminate {
        attempt: u32,
        signal: TerminationSignal,
    },
    Kill {
        attempt: u32,
        signal: TerminationSignal,
    },
    Retry {
        attempt: u32,
        next_timeout: Duration,
    },
}

/// One command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub domain: TimeoutDomain,
    pub category: Option<String>,
    pub requested_timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(domain: TimeoutDomain, program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            domain,
            category: None,
            requested_timeout: None,
        }
    }

    /// Build from an argv; the first element is the program.
    pub fn from_argv(domain: TimeoutDomain, argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        Ok(Self::new(domain, program.clone()).args(args.iter().cloned()))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.requested_timeout = Some(timeout);
        self
    }

    /// Shell-like rendering used for history keys and logs.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn timeout_context(&self) -> TimeoutContext {
        TimeoutContext {
            domain: self.domain,
            command: self.display_command(),
            category: self.category.clone(),
            cwd: self.cwd.as_ref().map(|p| p.display().to_string()),
            requested_timeout: self.requested_timeout,
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct CommandAttempt {
    pub attempt: u32,
    pub timeout: Duration,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub signals: Vec<TerminationSignal>,
    pub warning_emitted: bool,
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub domain: TimeoutDomain,
    pub key: String,
    pub attempts: Vec<CommandAttempt>,
    pub total_duration: Duration,
}

impl CommandResult {
    pub fn final_attempt(&self) -> Option<&CommandAttempt> {
        self.attempts.last()
    }

    pub fn stdout(&self) -> &str {
        self.final_attempt().map_or("", |a| a.stdout.as_str())
    }

    pub fn stderr(&self) -> &str {
        self.final_attempt().map_or("", |a| a.stderr.as_str())
    }

    pub fn timed_out(&self) -> bool {
        self.final_attempt().is_some_and(|a| a.timed_out)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.final_attempt().and_then(|a| a.exit_code)
    }

    /// Exit code, else 124 on timeout, else 1.
    pub fn effective_exit_code(&self) -> i32 {
        match self.exit_code() {
            Some(code) => code,
            None if self.timed_out() => TIMEOUT_EXIT_CODE,
            None => 1,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Signals sent to the final attempt, in order. Earlier attempts keep
    /// their own in [`CommandAttempt::signals`].
    pub fn signal_sequence(&self) -> &[TerminationSignal] {
        match self.final_attempt() {
            Some(attempt) => &attempt.signals,
            None => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    registry: TimeoutPolicyRegistry,
    history: Arc<TimeoutHistoryStore>,
    output_limit_bytes: usize,
}

impl CommandRunner {
    pub fn new(
        registry: TimeoutPolicyRegistry,
        history: Arc<TimeoutHistoryStore>,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            registry,
            history,
            output_limit_bytes,
        }
    }

    pub fn history(&self) -> &TimeoutHistoryStore {
        &self.history
    }

    /// Run `spec` to completion, retrying timeouts per policy.
    ///
    /// Only a launch failure is an error; timeouts and non-zero exits are data.
    #[instrument(skip_all, fields(domain = %spec.domain, command = %spec.display_command()))]
    pub fn run(
        &self,
        spec: &CommandSpec,
        mut on_event: impl FnMut(&CommandEvent),
    ) -> Result<CommandResult> {
        let context = spec.timeout_context();
        let key = context.command_key();
        let policy = self.registry.policy_for(spec.domain);
        let started = Instant::now();
        let mut attempts = Vec::new();

        let mut attempt = 1u32;
        loop {
            let hint = self.history.recommended_timeout(
                &key,
                policy.default_timeout,
                policy.backoff.max_timeout,
            );
            let timeout = self.registry.timeout_for_attempt(&context, attempt, Some(hint));
            let limits = StagedTimeout {
                timeout,
                warning_after: self.registry.warning_after(spec.domain, timeout),
                terminate_grace: policy.signal.terminate_grace,
                use_process_group: policy.use_process_group,
            };
            debug!(attempt, timeout_secs = timeout.as_secs_f64(), "starting attempt");

            let output = run_supervised(
                spec.to_command(),
                &limits,
                self.output_limit_bytes,
                |stage| on_event(&stage_event(attempt, stage)),
            )
            .with_context(|| format!("run {}", spec.display_command()))?;

            self.history.record(&key, output.duration, output.timed_out);
            let timed_out = output.timed_out;
            attempts.push(CommandAttempt {
                attempt,
                timeout,
                exit_code: output.exit_code,
                timed_out,
                duration: output.duration,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                signals: output.signals,
                warning_emitted: output.warning_emitted,
            });

            if !timed_out || !self.registry.should_retry_timeout(spec.domain, attempt) {
                break;
            }
            let next_timeout = self
                .registry
                .timeout_for_attempt(&context, attempt + 1, Some(hint));
            warn!(
                attempt,
                next_timeout_secs = next_timeout.as_secs_f64(),
                "command timed out, retrying"
            );
            on_event(&CommandEvent::Retry {
                attempt,
                next_timeout,
            });
            attempt += 1;
        }

        let result = CommandResult {
            command: spec.display_command(),
            domain: spec.domain,
            key,
            attempts,
            total_duration: started.elapsed(),
        };
        info!(
            attempts = result.attempts.len(),
            exit_code = result.effective_exit_code(),
            timed_out = result.timed_out(),
            "command finished"
        );
        Ok(result)
    }
}

fn stage_event(attempt: u32, stage: ProcessStage) -> CommandEvent {
    match stage {
        ProcessStage::Warning { elapsed } => CommandEvent::Warning { attempt, elapsed },
        ProcessStage::Signalled(signal @ TerminationSignal::Terminate) => {
            CommandEvent::Terminate { attempt, signal }
        }
        ProcessStage::Signalled(signal @ TerminationSignal::Kill) => {
            CommandEvent::Kill { attempt, signal }
        }
    }
}
