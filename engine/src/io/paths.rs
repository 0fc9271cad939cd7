//! Canonical locations inside a project directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// All engine-owned paths for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub docs_dir: PathBuf,
    pub flight_plan_path: PathBuf,
    pub journey_path: PathBuf,
    pub config_path: PathBuf,
    pub history_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".waypoints");
        Self {
            root: root.clone(),
            logs_dir: state_dir.join("logs"),
            docs_dir: root.join("docs"),
            flight_plan_path: state_dir.join("flight-plan.jsonl"),
            journey_path: state_dir.join("journey.json"),
            config_path: state_dir.join("config.toml"),
            history_path: state_dir.join("timeout_history.json"),
            state_dir,
        }
    }

    /// Directory name of the root, used as the project slug in commit messages and tags.
    pub fn slug(&self) -> String {
        let name = self
            .root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "project".to_string());
        slugify(&name)
    }

    /// Latest `docs/product-spec*.md` by file name, if any.
    pub fn latest_spec_path(&self) -> Result<Option<PathBuf>> {
        if !self.docs_dir.is_dir() {
            return Ok(None);
        }
        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.docs_dir)
            .with_context(|| format!("read directory {}", self.docs_dir.display()))?
        {
            let entry = entry.with_context(|| format!("read {}", self.docs_dir.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("product-spec") && name.ends_with(".md") {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        Ok(candidates.pop())
    }

    /// Product spec text handed to the executor. Empty when the project has none.
    pub fn load_spec(&self) -> Result<String> {
        match self.latest_spec_path()? {
            Some(path) => {
                debug!(path = %path.display(), "loading product spec");
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
            }
            None => Ok(String::new()),
        }
    }
}

/// Lowercase, with every run of non-alphanumerics collapsed to a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("project");
    }
    slug
}

/// Write `contents` to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
