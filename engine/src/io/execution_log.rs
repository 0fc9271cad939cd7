//! Append-only execution log under `.waypoints/logs/`.
//!
//! One JSONL file per run. These are product artifacts, written regardless of
//! `RUST_LOG`; tracing output is for diagnostics only.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::intervention::{InterventionAction, InterventionType};
use crate::core::provenance::WorkspaceDiffSummary;
use crate::core::waypoint::WaypointStatus;
use crate::io::jsonl::{append_record, ensure_supported, header_line, parse_header};

pub const EXECUTION_LOG_SCHEMA: &str = "execution_log";
pub const EXECUTION_LOG_VERSION: &str = "1.0";

/// Typed log entries. Each variant is one line kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    WaypointStarted {
        waypoint_id: String,
        title: String,
    },
    Iteration {
        waypoint_id: String,
        iteration: u32,
        max_iterations: u32,
    },
    Command {
        waypoint_id: Option<String>,
        command: String,
        exit_code: i32,
        timed_out: bool,
        attempts: usize,
        duration_ms: u64,
    },
    WorkspaceDiff {
        waypoint_id: String,
        summary: WorkspaceDiffSummary,
    },
    Intervention {
        waypoint_id: String,
        intervention_type: InterventionType,
        error_summary: String,
        suggested_action: InterventionAction,
    },
    Resolution {
        waypoint_id: String,
        action: InterventionAction,
        message: Option<String>,
    },
    WaypointFinished {
        waypoint_id: String,
        status: WaypointStatus,
        duration_ms: u64,
    },
    RunFinished {
        completed: usize,
        failed: usize,
        skipped: usize,
        stop: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: LogEntry,
}

#[derive(Debug, Clone)]
pub struct ExecutionLog {
    execution_id: String,
    path: PathBuf,
}

impl ExecutionLog {
    /// Start a new log file for one run of `project`.
    pub fn create(logs_dir: &Path, project: &str) -> Result<Self> {
        fs::create_dir_all(logs_dir)
            .with_context(|| format!("create directory {}", logs_dir.display()))?;
        let started_at = Utc::now();
        let base = format!("{project}-{}", started_at.format("%Y%m%d-%H%M%S"));
        let mut execution_id = base.clone();
        let mut n = 1;
        while logs_dir.join(format!("{execution_id}.jsonl")).exists() {
            n += 1;
            execution_id = format!("{base}-{n}");
        }
        let path = logs_dir.join(format!("{execution_id}.jsonl"));

        let mut fields = Map::new();
        fields.insert(
            "execution_id".to_string(),
            Value::String(execution_id.clone()),
        );
        fields.insert("project".to_string(), Value::String(project.to_string()));
        fields.insert(
            "started_at".to_string(),
            Value::String(started_at.to_rfc3339()),
        );
        let mut header = header_line(EXECUTION_LOG_SCHEMA, EXECUTION_LOG_VERSION, fields)?;
        header.push('\n');
        fs::write(&path, header).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "execution log created");
        Ok(Self { execution_id, path })
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: LogEntry) -> Result<()> {
        append_record(
            &self.path,
            &LogRecord {
                timestamp: Utc::now(),
                entry,
            },
        )
    }
}

/// Read every entry of a log file, skipping the header.
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut lines = contents.lines();
    let header = parse_header(lines.next().unwrap_or_default(), EXECUTION_LOG_SCHEMA)?;
    if header.is_legacy() {
        bail!("{} has no execution log header", path.display());
    }
    ensure_supported(&header, EXECUTION_LOG_VERSION)?;
    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .with_context(|| format!("parse log entry in {}", path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_tagged_and_read_back_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = ExecutionLog::create(temp.path(), "demo").expect("create");
        log.append(LogEntry::WaypointStarted {
            waypoint_id: "WP-1".to_string(),
            title: "First".to_string(),
        })
        .expect("append");
        log.append(LogEntry::WaypointFinished {
            waypoint_id: "WP-1".to_string(),
            status: WaypointStatus::Complete,
            duration_ms: 12,
        })
        .expect("append");

        let raw = fs::read_to_string(log.path()).expect("read");
        assert!(raw.lines().nth(1).expect("line").contains(r#""type":"waypoint_started""#));

        let records = read_log(log.path()).expect("read log");
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[1].entry,
            LogEntry::WaypointFinished {
                status: WaypointStatus::Complete,
                ..
            }
        ));
    }

    #[test]
    fn runs_in_the_same_second_get_distinct_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = ExecutionLog::create(temp.path(), "demo").expect("first");
        let second = ExecutionLog::create(temp.path(), "demo").expect("second");
        assert_ne!(first.path(), second.path());
        assert!(first.execution_id().starts_with("demo-"));
    }
}
