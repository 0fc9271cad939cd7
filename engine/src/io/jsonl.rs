//! Versioned JSONL files: a schema header line followed by one record per line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::io::paths::write_atomic;

pub const LEGACY_VERSION: &str = "0.0";

/// Parsed first line of a versioned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHeader {
    pub schema: String,
    pub version: String,
    /// Remaining header fields (e.g. timestamps).
    pub fields: Map<String, Value>,
}

impl SchemaHeader {
    pub fn is_legacy(&self) -> bool {
        self.version == LEGACY_VERSION
    }
}

/// Header object carrying `_schema`/`_version` followed by `fields`.
pub fn header_line(schema: &str, version: &str, fields: Map<String, Value>) -> Result<String> {
    let mut header = Map::new();
    header.insert("_schema".to_string(), Value::String(schema.to_string()));
    header.insert("_version".to_string(), Value::String(version.to_string()));
    for (key, value) in fields {
        header.entry(key).or_insert(value);
    }
    serde_json::to_string(&Value::Object(header)).context("serialize schema header")
}

/// Interpret the first line of a file expected to hold `expected_schema`.
///
/// A header without schema fields (or an empty first line) is legacy `0.0`.
/// A header naming a different schema is an error.
pub fn parse_header(first_line: &str, expected_schema: &str) -> Result<SchemaHeader> {
    let trimmed = first_line.trim();
    if trimmed.is_empty() {
        return Ok(SchemaHeader {
            schema: expected_schema.to_string(),
            version: LEGACY_VERSION.to_string(),
            fields: Map::new(),
        });
    }
    let value: Value = serde_json::from_str(trimmed).context("parse header line")?;
    let Value::Object(mut fields) = value else {
        bail!("header line is not a JSON object");
    };
    let schema = fields.remove("_schema");
    let version = fields.remove("_version");
    match (schema, version) {
        (Some(Value::String(schema)), Some(Value::String(version))) => {
            if schema != expected_schema {
                bail!("expected schema '{expected_schema}', got '{schema}'");
            }
            Ok(SchemaHeader {
                schema,
                version,
                fields,
            })
        }
        _ => Ok(SchemaHeader {
            schema: expected_schema.to_string(),
            version: LEGACY_VERSION.to_string(),
            fields,
        }),
    }
}

/// Reject versions with a newer major than `current`.
pub fn ensure_supported(header: &SchemaHeader, current: &str) -> Result<()> {
    let major = |v: &str| -> Result<u32> {
        v.split('.')
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| anyhow!("malformed schema version '{v}'"))
    };
    if major(&header.version)? > major(current)? {
        bail!(
            "{} version {} is newer than supported {}",
            header.schema,
            header.version,
            current
        );
    }
    Ok(())
}

/// Rewrite a legacy file's header in place so it carries schema fields.
pub fn migrate_legacy_header(path: &Path, schema: &str, current: &str) -> Result<()> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut lines = contents.lines();
    let first = lines.next().unwrap_or_default();
    let header = parse_header(first, schema)?;
    if !header.is_legacy() {
        return Ok(());
    }
    info!(path = %path.display(), schema, from = LEGACY_VERSION, to = current, "migrating file");
    let mut buf = header_line(schema, current, header.fields)?;
    buf.push('\n');
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

/// Append one record as a single line.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_string(record).context("serialize record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_without_schema_fields_is_legacy() {
        let header = parse_header(r#"{"created_at":"2024-01-01T00:00:00Z"}"#, "flight_plan")
            .expect("parse");
        assert!(header.is_legacy());
        assert!(header.fields.contains_key("created_at"));
    }

    #[test]
    fn wrong_schema_is_rejected() {
        let err = parse_header(r#"{"_schema":"session","_version":"1.0"}"#, "flight_plan")
            .expect_err("mismatch");
        assert!(err.to_string().contains("expected schema 'flight_plan'"));
    }

    #[test]
    fn newer_major_version_is_rejected() {
        let header = parse_header(r#"{"_schema":"flight_plan","_version":"2.1"}"#, "flight_plan")
            .expect("parse");
        assert!(ensure_supported(&header, "1.0").is_err());
        let header = parse_header(r#"{"_schema":"flight_plan","_version":"1.3"}"#, "flight_plan")
            .expect("parse");
        assert!(ensure_supported(&header, "1.0").is_ok());
    }

    #[test]
    fn header_line_puts_schema_fields_first() {
        let mut fields = Map::new();
        fields.insert("created_at".to_string(), Value::String("t".to_string()));
        let line = header_line("execution_log", "1.0", fields).expect("header");
        assert!(line.starts_with(r#"{"_schema":"execution_log","_version":"1.0""#));
    }
}
