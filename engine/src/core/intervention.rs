//! Intervention protocol: typed failure signals and their resolutions.
//!
//! An [`Intervention`] is data, not control flow. Executors return it inside
//! their outcome, and the execution controller decides what happens next from
//! the [`InterventionResult`] a human (or the headless `--on-error` policy)
//! chooses.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::waypoint::Waypoint;

/// Why automated execution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    IterationLimit,
    TestFailure,
    LintError,
    TypeError,
    ParseError,
    UserRequested,
    ExecutionError,
    RateLimited,
    ApiUnavailable,
    BudgetExceeded,
}

/// Resolution chosen for an intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionAction {
    Retry,
    Skip,
    Edit,
    Rollback,
    Abort,
    Wait,
}

impl InterventionType {
    /// Default resolution offered to the user. Advisory only.
    pub fn suggested_action(self) -> InterventionAction {
        match self {
            Self::TestFailure => InterventionAction::Edit,
            Self::UserRequested => InterventionAction::Abort,
            Self::BudgetExceeded => InterventionAction::Wait,
            Self::IterationLimit
            | Self::LintError
            | Self::TypeError
            | Self::ParseError
            | Self::ExecutionError
            | Self::RateLimited
            | Self::ApiUnavailable => InterventionAction::Retry,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IterationLimit => "iteration_limit",
            Self::TestFailure => "test_failure",
            Self::LintError => "lint_error",
            Self::TypeError => "type_error",
            Self::ParseError => "parse_error",
            Self::UserRequested => "user_requested",
            Self::ExecutionError => "execution_error",
            Self::RateLimited => "rate_limited",
            Self::ApiUnavailable => "api_unavailable",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }
}

impl std::fmt::Display for InterventionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for InterventionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Edit => "edit",
            Self::Rollback => "rollback",
            Self::Abort => "abort",
            Self::Wait => "wait",
        };
        f.write_str(name)
    }
}

/// Everything a decision-maker needs to resolve a stalled waypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    #[serde(rename = "type")]
    pub kind: InterventionType,
    pub waypoint: Waypoint,
    pub iteration: u32,
    pub max_iterations: u32,
    pub error_summary: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Intervention {
    pub fn new(
        kind: InterventionType,
        waypoint: Waypoint,
        iteration: u32,
        max_iterations: u32,
        error_summary: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            waypoint,
            iteration,
            max_iterations,
            error_summary: error_summary.into(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn suggested_action(&self) -> InterventionAction {
        self.kind.suggested_action()
    }
}

pub const DEFAULT_ADDITIONAL_ITERATIONS: u32 = 5;

/// The chosen resolution for an intervention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionResult {
    pub action: InterventionAction,
    #[serde(default = "default_additional_iterations")]
    pub additional_iterations: u32,
    #[serde(default)]
    pub modified_waypoint: Option<Waypoint>,
    #[serde(default)]
    pub rollback_ref: Option<String>,
}

fn default_additional_iterations() -> u32 {
    DEFAULT_ADDITIONAL_ITERATIONS
}

impl InterventionResult {
    pub fn new(action: InterventionAction) -> Self {
        Self {
            action,
            additional_iterations: DEFAULT_ADDITIONAL_ITERATIONS,
            modified_waypoint: None,
            rollback_ref: None,
        }
    }

    pub fn rollback_to(reference: impl Into<String>) -> Self {
        Self {
            rollback_ref: Some(reference.into()),
            ..Self::new(InterventionAction::Rollback)
        }
    }
}

const USER_INTERVENTION_MARKERS: [&str; 5] = [
    "cannot proceed",
    "need human help",
    "blocked by",
    "unable to complete",
    "requires manual",
];

const BUDGET_PATTERNS: [&str; 11] = [
    "budget",
    "spending limit",
    "billing",
    "credit",
    "quota exceeded",
    "usage limit",
    "daily limit",
    "out of extra usage",
    "out of usage",
    "limit reached",
    "resets",
];

const RATE_LIMIT_PATTERNS: [&str; 6] = [
    "rate limit",
    "rate_limit",
    "ratelimit",
    "429",
    "too many requests",
    "throttl",
];

const UNAVAILABLE_PATTERNS: [&str; 9] = [
    "overloaded",
    "503",
    "502",
    "504",
    "unavailable",
    "service error",
    "temporarily",
    "try again later",
    "capacity",
];

static TEST_FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(\btest result: FAILED\b|\b\d+ (tests? )?failed\b|^FAILED\b|assertion.*failed)")
        .unwrap()
});
static TYPE_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(error\[E0308\]|mismatched types|\btype ?error\b|incompatible types?)").unwrap()
});
static LINT_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\bclippy::|\blint(er|ing)?\b.*\b(error|fail)|ruff|eslint)").unwrap()
});
static PARSE_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\bparse error\b|\bsyntax ?error\b|invalid json|expected value at line)")
        .unwrap()
});

/// True when the output carries an explicit request for a human.
pub fn needs_user_intervention(output: &str) -> bool {
    let lower = output.to_lowercase();
    USER_INTERVENTION_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Excerpt surrounding the first intervention marker found in `output`.
pub fn extract_intervention_reason(output: &str) -> String {
    let lower = output.to_lowercase();
    for marker in USER_INTERVENTION_MARKERS {
        // Lowercasing can shift byte offsets for non-ASCII text; only slice
        // the original when the offsets line up.
        if let Some(idx) = lower.find(marker)
            && lower.len() == output.len()
        {
            let start = floor_char_boundary(output, idx.saturating_sub(100));
            let end = floor_char_boundary(output, (idx + marker.len() + 200).min(output.len()));
            return format!("Agent indicated: ...{}...", output[start..end].trim());
        }
        if lower.contains(marker) {
            return format!("Agent indicated: {marker}");
        }
    }
    "Agent requested human intervention".to_string()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Classify failure output into an intervention type and a human summary.
///
/// Explicit escalation markers win, then provider budget/rate/availability
/// phrases, then toolchain failure shapes. Anything else is an execution error.
pub fn classify_failure_output(output: &str) -> (InterventionType, String) {
    if needs_user_intervention(output) {
        return (
            InterventionType::UserRequested,
            extract_intervention_reason(output),
        );
    }

    let lower = output.to_lowercase();
    if BUDGET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return (
            InterventionType::BudgetExceeded,
            "Model usage budget exceeded. Execution paused until budget resets.".to_string(),
        );
    }
    if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return (
            InterventionType::RateLimited,
            "Model provider rate limit reached. Wait a few minutes and retry.".to_string(),
        );
    }
    if UNAVAILABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return (
            InterventionType::ApiUnavailable,
            "Model provider temporarily unavailable. Try again shortly.".to_string(),
        );
    }

    let kind = if TEST_FAILURE_RE.is_match(output) {
        InterventionType::TestFailure
    } else if TYPE_ERROR_RE.is_match(output) {
        InterventionType::TypeError
    } else if LINT_ERROR_RE.is_match(output) {
        InterventionType::LintError
    } else if PARSE_ERROR_RE.is_match(output) {
        InterventionType::ParseError
    } else {
        InterventionType::ExecutionError
    };
    (kind, last_meaningful_line(output))
}

fn last_meaningful_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(300).collect())
        .unwrap_or_else(|| "Execution failed without output".to_string())
}
