//! Learned per-command duration statistics.
//!
//! Keyed by [`crate::core::timeout_policy::TimeoutContext::command_key`]. Each
//! key keeps run and timeout counters plus a bounded window of recent
//! durations, which feed [`TimeoutHistory::recommended_timeout`].

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SAMPLES_PER_KEY: usize = 20;
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyHistory {
    pub runs: u64,
    pub timeouts: u64,
    /// Seconds, oldest first.
    pub durations: VecDeque<f64>,
}

/// Point-in-time statistics for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutStats {
    pub key: String,
    pub runs: u64,
    pub timeout_count: u64,
    pub success_count: u64,
    pub max_duration: Duration,
    pub p90_duration: Option<Duration>,
}

/// Serialized form of a [`TimeoutHistory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub keys: BTreeMap<String, KeyHistory>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutHistory {
    max_samples_per_key: usize,
    keys: BTreeMap<String, KeyHistory>,
}

impl Default for TimeoutHistory {
    fn default() -> Self {
        Self::with_max_samples(DEFAULT_MAX_SAMPLES_PER_KEY)
    }
}

impl TimeoutHistory {
    pub fn with_max_samples(max_samples_per_key: usize) -> Self {
        Self {
            max_samples_per_key: max_samples_per_key.max(1),
            keys: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, key: &str, duration: Duration, timed_out: bool) {
        let entry = self.keys.entry(key.to_string()).or_default();
        entry.runs += 1;
        if timed_out {
            entry.timeouts += 1;
        }
        entry.durations.push_back(duration.as_secs_f64().max(0.0));
        while entry.durations.len() > self.max_samples_per_key {
            entry.durations.pop_front();
        }
    }

    /// `max(fallback, min(observed_max * (1.5 + min(timeout_rate, 0.5)), ceiling))`,
    /// or `fallback` when nothing has been observed for `key`.
    pub fn recommended_timeout(
        &self,
        key: &str,
        fallback: Duration,
        ceiling: Duration,
    ) -> Duration {
        let Some(entry) = self
            .keys
            .get(key)
            .filter(|entry| !entry.durations.is_empty())
        else {
            return fallback;
        };
        let observed_max = entry.durations.iter().copied().fold(0.0_f64, f64::max);
        let timeout_rate = if entry.runs > 0 {
            entry.timeouts as f64 / entry.runs as f64
        } else {
            0.0
        };
        let headroom = 1.5 + timeout_rate.min(0.5);
        let recommended = seconds(observed_max * headroom);
        fallback.max(recommended.min(ceiling))
    }

    pub fn stats(&self, key: &str) -> TimeoutStats {
        let entry = self.keys.get(key).cloned().unwrap_or_default();
        let mut ordered: Vec<f64> = entry.durations.iter().copied().collect();
        ordered.sort_by(f64::total_cmp);
        let p90 = if ordered.is_empty() {
            None
        } else {
            let index = ((ordered.len() - 1) as f64 * 0.9) as usize;
            Some(seconds(ordered[index]))
        };
        TimeoutStats {
            key: key.to_string(),
            runs: entry.runs,
            timeout_count: entry.timeouts,
            success_count: entry.runs.saturating_sub(entry.timeouts),
            max_duration: seconds(ordered.last().copied().unwrap_or(0.0)),
            p90_duration: p90,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn to_document(&self) -> HistoryDocument {
        HistoryDocument {
            schema_version: HISTORY_SCHEMA_VERSION,
            keys: self.keys.clone(),
        }
    }

    /// Rebuild from a document, dropping non-finite or negative samples and
    /// trimming each window to the sample limit.
    pub fn from_document(document: HistoryDocument, max_samples_per_key: usize) -> Self {
        let mut history = Self::with_max_samples(max_samples_per_key);
        for (key, mut entry) in document.keys {
            entry.durations.retain(|d| d.is_finite() && *d >= 0.0);
            while entry.durations.len() > history.max_samples_per_key {
                entry.durations.pop_front();
            }
            entry.timeouts = entry.timeouts.min(entry.runs);
            history.keys.insert(key, entry);
        }
        history
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "host_validation|-|-|make check";

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn unknown_key_returns_fallback() {
        let history = TimeoutHistory::default();
        assert_eq!(history.recommended_timeout(KEY, secs(10), secs(60)), secs(10));
    }

    #[test]
    fn fast_runs_keep_fallback_and_timeouts_raise_it() {
        let mut history = TimeoutHistory::default();
        for d in [5, 6, 5] {
            history.record(KEY, secs(d), false);
        }
        assert_eq!(history.recommended_timeout(KEY, secs(10), secs(60)), secs(10));

        history.record(KEY, secs(6), true);
        let raised = history.recommended_timeout(KEY, secs(10), secs(60));
        assert!(raised > secs(10), "expected increase, got {raised:?}");
    }

    #[test]
    fn recommendation_respects_ceiling() {
        let mut history = TimeoutHistory::default();
        history.record(KEY, secs(100), true);
        assert_eq!(history.recommended_timeout(KEY, secs(10), secs(60)), secs(60));
    }

    #[test]
    fn window_is_bounded() {
        let mut history = TimeoutHistory::with_max_samples(3);
        for d in [50, 1, 2, 3] {
            history.record(KEY, secs(d), false);
        }
        let stats = history.stats(KEY);
        assert_eq!(stats.runs, 4);
        assert_eq!(stats.max_duration, secs(3));
    }

    #[test]
    fn stats_report_counts_and_p90() {
        let mut history = TimeoutHistory::default();
        for d in 1..=10 {
            history.record(KEY, secs(d), d == 10);
        }
        let stats = history.stats(KEY);
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.success_count, 9);
        assert_eq!(stats.p90_duration, Some(secs(9)));
        assert_eq!(history.stats("missing").p90_duration, None);
    }

    #[test]
    fn document_round_trip_sanitizes_samples() {
        let mut history = TimeoutHistory::default();
        history.record(KEY, secs(4), false);
        let mut doc = history.to_document();
        let entry = doc.keys.get_mut(KEY).expect("key");
        entry.durations.push_back(f64::NAN);
        entry.durations.push_back(-1.0);

        let restored = TimeoutHistory::from_document(doc, DEFAULT_MAX_SAMPLES_PER_KEY);
        assert_eq!(restored, history);
    }
}
