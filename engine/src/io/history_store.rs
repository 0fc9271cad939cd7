//! Shared, persisted [`TimeoutHistory`].
//!
//! One store is opened at startup and handed to every command runner by
//! reference (`Arc`). Recording is serialized through a mutex; the document is
//! flushed every `autosave_every` samples and once more on drop. Samples that
//! were never flushed are lost on a crash, which only costs adaptivity.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::timeout_history::{
    DEFAULT_MAX_SAMPLES_PER_KEY, HistoryDocument, TimeoutHistory, TimeoutStats,
};
use crate::io::paths::write_atomic;

#[derive(Debug)]
struct Inner {
    history: TimeoutHistory,
    unsaved: usize,
}

#[derive(Debug)]
pub struct TimeoutHistoryStore {
    path: Option<PathBuf>,
    autosave_every: usize,
    inner: Mutex<Inner>,
}

impl TimeoutHistoryStore {
    /// Load from `path`. A missing, unreadable or malformed file starts empty.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path, autosave_every: usize) -> Self {
        let history = match load_document(path) {
            Ok(Some(document)) => {
                TimeoutHistory::from_document(document, DEFAULT_MAX_SAMPLES_PER_KEY)
            }
            Ok(None) => TimeoutHistory::default(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "ignoring unreadable timeout history");
                TimeoutHistory::default()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            autosave_every: autosave_every.max(1),
            inner: Mutex::new(Inner {
                history,
                unsaved: 0,
            }),
        }
    }

    /// Never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            autosave_every: usize::MAX,
            inner: Mutex::new(Inner {
                history: TimeoutHistory::default(),
                unsaved: 0,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one sample and flush when the autosave threshold is reached.
    /// A failed flush is logged and the samples stay pending.
    pub fn record(&self, key: &str, duration: Duration, timed_out: bool) {
        let Ok(mut inner) = self.lock() else {
            warn!("timeout history lock poisoned, dropping sample");
            return;
        };
        inner.history.record(key, duration, timed_out);
        inner.unsaved += 1;
        if inner.unsaved >= self.autosave_every
            && let Err(err) = self.flush_locked(&mut inner)
        {
            warn!(err = %format!("{err:#}"), "timeout history autosave failed");
        }
    }

    pub fn recommended_timeout(
        &self,
        key: &str,
        fallback: Duration,
        ceiling: Duration,
    ) -> Duration {
        match self.lock() {
            Ok(inner) => inner.history.recommended_timeout(key, fallback, ceiling),
            Err(_) => fallback,
        }
    }

    pub fn stats(&self, key: &str) -> Result<TimeoutStats> {
        Ok(self.lock()?.history.stats(key))
    }

    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock()?;
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        write_history(self.path.as_deref(), inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("timeout history lock poisoned"))
    }
}

impl Drop for TimeoutHistoryStore {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut()
            && inner.unsaved > 0
            && let Err(err) = write_history(self.path.as_deref(), inner)
        {
            warn!(err = %format!("{err:#}"), "timeout history flush on shutdown failed");
        }
    }
}

fn write_history(path: Option<&Path>, inner: &mut Inner) -> Result<()> {
    let Some(path) = path else {
        inner.unsaved = 0;
        return Ok(());
    };
    let mut buf = serde_json::to_string_pretty(&inner.history.to_document())
        .context("serialize timeout history")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    debug!(path = %path.display(), samples = inner.unsaved, "timeout history flushed");
    inner.unsaved = 0;
    Ok(())
}

fn load_document(path: &Path) -> Result<Option<HistoryDocument>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let document = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(document))
}
