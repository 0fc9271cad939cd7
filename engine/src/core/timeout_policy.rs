//! Static per-domain timeout, backoff and signal policies.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named category of command, each with its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutDomain {
    HostValidation,
    LlmToolBash,
    FlightTest,
    UiGitProbe,
    GitOperation,
}

impl TimeoutDomain {
    pub const ALL: [TimeoutDomain; 5] = [
        Self::HostValidation,
        Self::LlmToolBash,
        Self::FlightTest,
        Self::UiGitProbe,
        Self::GitOperation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostValidation => "host_validation",
            Self::LlmToolBash => "llm_tool_bash",
            Self::FlightTest => "flight_test",
            Self::UiGitProbe => "ui_git_probe",
            Self::GitOperation => "git_operation",
        }
    }
}

impl std::fmt::Display for TimeoutDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeoutDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == s)
            .ok_or_else(|| format!("unknown timeout domain '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub multiplier: f64,
    pub max_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalPolicy {
    /// Fraction of the timeout after which a warning is emitted. Disabled outside (0, 1).
    pub warning_fraction: f64,
    /// Time between terminate and kill.
    pub terminate_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub domain: TimeoutDomain,
    pub default_timeout: Duration,
    pub min_timeout: Duration,
    pub retry_on_timeout: bool,
    pub use_process_group: bool,
    pub backoff: BackoffPolicy,
    pub signal: SignalPolicy,
}

#[allow(clippy::too_many_arguments)]
const fn policy(
    domain: TimeoutDomain,
    default_secs: u64,
    min_secs: u64,
    retry_on_timeout: bool,
    use_process_group: bool,
    max_attempts: u32,
    multiplier: f64,
    max_secs: u64,
    warning_fraction: f64,
    grace_secs: u64,
) -> TimeoutPolicy {
    TimeoutPolicy {
        domain,
        default_timeout: Duration::from_secs(default_secs),
        min_timeout: Duration::from_secs(min_secs),
        retry_on_timeout,
        use_process_group,
        backoff: BackoffPolicy {
            max_attempts,
            multiplier,
            max_timeout: Duration::from_secs(max_secs),
        },
        signal: SignalPolicy {
            warning_fraction,
            terminate_grace: Duration::from_secs(grace_secs),
        },
    }
}

impl TimeoutPolicy {
    pub const fn default_for(domain: TimeoutDomain) -> TimeoutPolicy {
        use TimeoutDomain as D;
        match domain {
            D::HostValidation => policy(domain, 300, 30, true, true, 3, 2.0, 1800, 0.75, 15),
            D::LlmToolBash => policy(domain, 120, 1, false, true, 1, 1.0, 900, 0.8, 2),
            D::FlightTest => policy(domain, 180, 5, false, true, 1, 1.0, 1800, 0.8, 10),
            D::UiGitProbe => policy(domain, 5, 1, false, false, 1, 1.0, 30, 0.9, 1),
            D::GitOperation => policy(domain, 30, 3, false, false, 1, 1.0, 300, 0.85, 3),
        }
    }

    fn clamp(&self, value: Duration) -> Duration {
        value.clamp(self.min_timeout, self.backoff.max_timeout.max(self.min_timeout))
    }
}

/// Describes one command invocation for timeout resolution and history keying.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutContext {
    pub domain: TimeoutDomain,
    pub command: String,
    pub category: Option<String>,
    pub cwd: Option<String>,
    pub requested_timeout: Option<Duration>,
}

impl TimeoutContext {
    pub fn new(domain: TimeoutDomain, command: impl Into<String>) -> Self {
        Self {
            domain,
            command: command.into(),
            category: None,
            cwd: None,
            requested_timeout: None,
        }
    }

    /// History key: `domain|category|cwd|command`, with runs of whitespace collapsed.
    pub fn command_key(&self) -> String {
        let normalized = self.command.split_whitespace().collect::<Vec<_>>().join(" ");
        format!(
            "{}|{}|{}|{}",
            self.domain,
            self.category.as_deref().unwrap_or("-"),
            self.cwd.as_deref().unwrap_or("-"),
            normalized
        )
    }
}

/// Lookup of policies by domain, seeded with the built-in defaults.
#[derive(Debug, Clone)]
pub struct TimeoutPolicyRegistry {
    policies: HashMap<TimeoutDomain, TimeoutPolicy>,
}

impl Default for TimeoutPolicyRegistry {
    fn default() -> Self {
        Self {
            policies: TimeoutDomain::ALL
                .into_iter()
                .map(|domain| (domain, TimeoutPolicy::default_for(domain)))
                .collect(),
        }
    }
}

impl TimeoutPolicyRegistry {
    /// Replace the policy for `policy.domain`.
    pub fn with_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policies.insert(policy.domain, policy);
        self
    }

    pub fn policy_for(&self, domain: TimeoutDomain) -> TimeoutPolicy {
        self.policies
            .get(&domain)
            .copied()
            .unwrap_or_else(|| TimeoutPolicy::default_for(domain))
    }

    /// Resolve the timeout for a 1-indexed attempt.
    ///
    /// An explicit request is clamped and used as-is. Otherwise the contextual
    /// base (raised by the history hint) is scaled by backoff, then clamped.
    pub fn timeout_for_attempt(
        &self,
        context: &TimeoutContext,
        attempt: u32,
        history_hint: Option<Duration>,
    ) -> Duration {
        let policy = self.policy_for(context.domain);
        if let Some(requested) = context.requested_timeout {
            return policy.clamp(requested);
        }

        let mut base = contextual_base_timeout(&policy, context);
        if let Some(hint) = history_hint {
            base = base.max(hint);
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = base.as_secs_f64() * policy.backoff.multiplier.powi(exponent);
        policy.clamp(duration_from_secs_saturating(scaled))
    }

    pub fn should_retry_timeout(&self, domain: TimeoutDomain, attempt: u32) -> bool {
        let policy = self.policy_for(domain);
        policy.retry_on_timeout && attempt < policy.backoff.max_attempts
    }

    /// Point at which to emit a "still running" warning, if the domain wants one.
    pub fn warning_after(&self, domain: TimeoutDomain, timeout: Duration) -> Option<Duration> {
        let fraction = self.policy_for(domain).signal.warning_fraction;
        if fraction <= 0.0 || fraction >= 1.0 {
            return None;
        }
        let warning = timeout.mul_f64(fraction);
        (!warning.is_zero() && warning < timeout).then_some(warning)
    }
}

/// Known slow command shapes get a larger starting budget.
fn contextual_base_timeout(policy: &TimeoutPolicy, context: &TimeoutContext) -> Duration {
    let mut base = policy.default_timeout;
    if context.domain == TimeoutDomain::HostValidation {
        let command = context.command.to_lowercase();
        if command.contains("cargo clippy") {
            base = base.max(Duration::from_secs(900));
        } else if command.contains("cargo") {
            base = base.max(Duration::from_secs(600));
        } else if context.category.as_deref() == Some("type") {
            base = base.max(Duration::from_secs(420));
        }
    }
    policy.clamp(base)
}

fn duration_from_secs_saturating(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
