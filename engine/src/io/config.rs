//! Engine configuration stored under `.waypoints/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::timeout_policy::TimeoutDomain;
use crate::io::paths::{ProjectPaths, write_atomic};
use crate::run::OnErrorPolicy;

/// Engine configuration (TOML).
///
/// Hand-edited. Missing fields take their defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Iteration budget handed to the executor for each waypoint.
    pub max_iterations: u32,

    /// What `run` does when a waypoint fails, unless overridden on the command line.
    pub on_error: OnErrorPolicy,

    /// Per-stream cap on captured subprocess output.
    pub output_limit_bytes: usize,

    pub executor: ExecutorConfig,
    pub history: HistoryConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Command run once per waypoint (e.g. `["./fly.sh"]`). Waypoint details
    /// are passed through `WAYPOINT_*` environment variables.
    pub command: Vec<String>,
    /// Timeout domain applied to the executor command.
    pub domain: TimeoutDomain,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            domain: TimeoutDomain::HostValidation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Defaults to `.waypoints/timeout_history.json` in the project.
    pub path: Option<PathBuf>,
    /// Flush to disk after this many recorded samples.
    pub autosave_every: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            autosave_every: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    /// Commit and tag after each completed waypoint.
    pub auto_commit: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self { auto_commit: true }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            on_error: OnErrorPolicy::Abort,
            output_limit_bytes: 100_000,
            executor: ExecutorConfig::default(),
            history: HistoryConfig::default(),
            git: GitConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.history.autosave_every == 0 {
            return Err(anyhow!("history.autosave_every must be > 0"));
        }
        if self
            .executor
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("executor.command must start with a program"));
        }
        Ok(())
    }

    /// Configured history path, resolved against the project root.
    pub fn history_path(&self, paths: &ProjectPaths) -> PathBuf {
        match &self.history.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => paths.root.join(path),
            None => paths.history_path.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "on_error = \"skip\"\n[executor]\ncommand = [\"./fly.sh\", \"--fast\"]\ndomain = \"flight_test\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.on_error, OnErrorPolicy::Skip);
        assert_eq!(cfg.executor.command, vec!["./fly.sh", "--fast"]);
        assert_eq!(cfg.executor.domain, TimeoutDomain::FlightTest);
        assert_eq!(cfg.max_iterations, 10);
        assert!(cfg.git.auto_commit);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".waypoints/config.toml");
        let cfg = EngineConfig {
            max_iterations: 3,
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn zero_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 0\n").expect("write");
        let err = load_config(&path).expect_err("zero iterations");
        assert!(format!("{err:#}").contains("max_iterations must be > 0"));

        let mut cfg = EngineConfig::default();
        cfg.history.autosave_every = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn relative_history_path_resolves_against_root() {
        let paths = ProjectPaths::new("/work/demo");
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.history_path(&paths), paths.history_path);
        cfg.history.path = Some(PathBuf::from("stats/history.json"));
        assert_eq!(
            cfg.history_path(&paths),
            PathBuf::from("/work/demo/stats/history.json")
        );
    }
}
