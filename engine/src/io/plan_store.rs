//! Flight plan persistence (`.waypoints/flight-plan.jsonl`).
//!
//! Line 1 is a schema header carrying the plan timestamps; every following
//! non-blank line is one waypoint, in plan order.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::core::waypoint::{FlightPlan, Waypoint};
use crate::io::jsonl::{
    append_record, ensure_supported, header_line, migrate_legacy_header, parse_header,
};
use crate::io::paths::write_atomic;

pub const FLIGHT_PLAN_SCHEMA: &str = "flight_plan";
pub const FLIGHT_PLAN_VERSION: &str = "1.0";

/// Load the plan, migrating a legacy header first. `None` when no file exists.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_flight_plan(path: &Path) -> Result<Option<FlightPlan>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let first = contents.lines().next().unwrap_or_default();
    let header = parse_header(first, FLIGHT_PLAN_SCHEMA)
        .with_context(|| format!("invalid header in {}", path.display()))?;
    ensure_supported(&header, FLIGHT_PLAN_VERSION)?;
    if header.is_legacy() && !first.trim().is_empty() {
        migrate_legacy_header(path, FLIGHT_PLAN_SCHEMA, FLIGHT_PLAN_VERSION)?;
    }

    let mut plan = FlightPlan::default();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if index == 0 && is_header(line)? {
            if let Some(created_at) = header_timestamp(&header.fields, "created_at") {
                plan.created_at = created_at;
            }
            if let Some(updated_at) = header_timestamp(&header.fields, "updated_at") {
                plan.updated_at = updated_at;
            }
            continue;
        }
        let waypoint: Waypoint = serde_json::from_str(line)
            .with_context(|| format!("parse waypoint on line {} of {}", index + 1, path.display()))?;
        plan.waypoints.push(waypoint);
    }
    debug!(waypoints = plan.waypoints.len(), "flight plan loaded");
    Ok(Some(plan))
}

/// Overwrite the whole plan atomically.
#[instrument(skip_all, fields(path = %path.display(), waypoints = plan.waypoints.len()))]
pub fn save_flight_plan(path: &Path, plan: &FlightPlan) -> Result<()> {
    let mut fields = Map::new();
    fields.insert(
        "created_at".to_string(),
        Value::String(plan.created_at.to_rfc3339()),
    );
    fields.insert(
        "updated_at".to_string(),
        Value::String(plan.updated_at.to_rfc3339()),
    );
    let mut buf = header_line(FLIGHT_PLAN_SCHEMA, FLIGHT_PLAN_VERSION, fields)?;
    buf.push('\n');
    for waypoint in &plan.waypoints {
        buf.push_str(&serde_json::to_string(waypoint).context("serialize waypoint")?);
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

/// Append one waypoint without rewriting the file. The file must already exist.
pub fn append_waypoint(path: &Path, waypoint: &Waypoint) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("flight plan {} does not exist", path.display());
    }
    append_record(path, waypoint)
}

/// A header line has timestamps or schema fields but no waypoint id.
fn is_header(line: &str) -> Result<bool> {
    let value: Value = serde_json::from_str(line).context("parse flight plan line")?;
    Ok(value.get("id").is_none()
        && (value.get("_schema").is_some() || value.get("created_at").is_some()))
}

fn header_timestamp(fields: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}
