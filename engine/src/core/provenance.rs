//! Workspace diff summaries used as execution evidence.
//!
//! Snapshots are captured by [`crate::io::snapshot`]; everything here is pure
//! and deterministic for a given pair of snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Files larger than this keep only their hash, not their content.
pub const MAX_INLINE_TEXT_BYTES: u64 = 256 * 1024;
/// Prefix length inspected by [`is_probably_text`].
pub const TEXT_SNIFF_BYTES: usize = 4096;
pub const MAX_CHANGED_FILES_REPORTED: usize = 200;
pub const TOP_CHANGED_FILES_REPORTED: usize = 10;

/// Above this many line pairs the matcher treats the differing middle as a
/// wholesale replacement instead of aligning it.
const MAX_DIFF_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub size_bytes: u64,
    pub digest: String,
    pub is_text: bool,
    /// Retained only for text files under [`MAX_INLINE_TEXT_BYTES`].
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    pub captured_at: DateTime<Utc>,
    /// Keyed by `/`-separated path relative to the snapshot root.
    pub files: BTreeMap<String, FileSnapshot>,
}

impl WorkspaceSnapshot {
    pub fn empty() -> Self {
        Self {
            captured_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub change_type: ChangeType,
    pub before_bytes: Option<u64>,
    pub after_bytes: Option<u64>,
    pub is_text: bool,
    pub text_chars_added: u64,
    pub text_chars_removed: u64,
}

impl ChangedFile {
    pub fn impact_chars(&self) -> u64 {
        self.text_chars_added + self.text_chars_removed
    }

    fn byte_delta(&self) -> u64 {
        self.after_bytes
            .unwrap_or(0)
            .abs_diff(self.before_bytes.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDiffSummary {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub total_files_changed: usize,
    pub text_files_changed: usize,
    pub binary_files_changed: usize,
    pub text_chars_added: u64,
    pub text_chars_removed: u64,
    pub indeterminate_text_files: usize,
    pub net_bytes_delta: i64,
    pub approx_tokens_changed: u64,
    pub changed_files: Vec<ChangedFile>,
    pub top_changed_files: Vec<ChangedFile>,
    pub omitted_changed_files: usize,
}

/// Null-byte and UTF-8 sniff over a bounded prefix. A multi-byte character
/// cut off at the end of the sample does not count against it.
pub fn is_probably_text(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return true;
    }
    if sample.contains(&0) {
        return false;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none(),
    }
}

pub fn approximate_tokens(chars: u64) -> u64 {
    chars.div_ceil(4)
}

fn estimate_text_size(file: &FileSnapshot) -> u64 {
    if !file.is_text {
        return 0;
    }
    match &file.content {
        Some(content) => content.chars().count() as u64,
        None => file.size_bytes,
    }
}

/// Summarize what changed between two snapshots.
///
/// Changed files are listed added, then deleted, then modified, each group
/// sorted by path.
pub fn summarize_workspace_diff(
    before: &WorkspaceSnapshot,
    after: &WorkspaceSnapshot,
) -> WorkspaceDiffSummary {
    let mut summary = WorkspaceDiffSummary::default();
    let mut changed = Vec::new();

    for (path, after_file) in &after.files {
        if before.files.contains_key(path) {
            continue;
        }
        let added = estimate_text_size(after_file);
        changed.push(ChangedFile {
            path: path.clone(),
            change_type: ChangeType::Added,
            before_bytes: None,
            after_bytes: Some(after_file.size_bytes),
            is_text: after_file.is_text,
            text_chars_added: added,
            text_chars_removed: 0,
        });
        summary.files_added += 1;
        summary.net_bytes_delta += signed(after_file.size_bytes);
    }

    for (path, before_file) in &before.files {
        if after.files.contains_key(path) {
            continue;
        }
        let removed = estimate_text_size(before_file);
        changed.push(ChangedFile {
            path: path.clone(),
            change_type: ChangeType::Deleted,
            before_bytes: Some(before_file.size_bytes),
            after_bytes: None,
            is_text: before_file.is_text,
            text_chars_added: 0,
            text_chars_removed: removed,
        });
        summary.files_deleted += 1;
        summary.net_bytes_delta -= signed(before_file.size_bytes);
    }

    for (path, before_file) in &before.files {
        let Some(after_file) = after.files.get(path) else {
            continue;
        };
        if before_file.digest == after_file.digest {
            continue;
        }
        let is_text = before_file.is_text && after_file.is_text;
        let (mut added, mut removed) = (0, 0);
        if is_text {
            match (&before_file.content, &after_file.content) {
                (Some(old), Some(new)) => (added, removed) = diff_text(old, new),
                _ => match after_file.size_bytes.cmp(&before_file.size_bytes) {
                    std::cmp::Ordering::Greater => {
                        added = after_file.size_bytes - before_file.size_bytes;
                    }
                    std::cmp::Ordering::Less => {
                        removed = before_file.size_bytes - after_file.size_bytes;
                    }
                    std::cmp::Ordering::Equal => summary.indeterminate_text_files += 1,
                },
            }
        }
        changed.push(ChangedFile {
            path: path.clone(),
            change_type: ChangeType::Modified,
            before_bytes: Some(before_file.size_bytes),
            after_bytes: Some(after_file.size_bytes),
            is_text,
            text_chars_added: added,
            text_chars_removed: removed,
        });
        summary.files_modified += 1;
        summary.net_bytes_delta += signed(after_file.size_bytes) - signed(before_file.size_bytes);
    }

    summary.total_files_changed = changed.len();
    summary.text_files_changed = changed.iter().filter(|file| file.is_text).count();
    summary.binary_files_changed = summary.total_files_changed - summary.text_files_changed;
    summary.text_chars_added = changed.iter().map(|file| file.text_chars_added).sum();
    summary.text_chars_removed = changed.iter().map(|file| file.text_chars_removed).sum();
    summary.approx_tokens_changed =
        approximate_tokens(summary.text_chars_added + summary.text_chars_removed);

    let mut ranked = changed.clone();
    ranked.sort_by(|a, b| {
        let key_a = (a.impact_chars(), a.byte_delta(), &a.path);
        let key_b = (b.impact_chars(), b.byte_delta(), &b.path);
        key_b.cmp(&key_a)
    });
    ranked.truncate(TOP_CHANGED_FILES_REPORTED);
    summary.top_changed_files = ranked;

    changed.truncate(MAX_CHANGED_FILES_REPORTED);
    summary.omitted_changed_files = summary.total_files_changed - changed.len();
    summary.changed_files = changed;
    summary
}

fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// Characters added and removed between two texts, aligned line by line.
pub fn diff_text(before: &str, after: &str) -> (u64, u64) {
    let old: Vec<&str> = before.split_inclusive('\n').collect();
    let new: Vec<&str> = after.split_inclusive('\n').collect();

    let prefix = old
        .iter()
        .zip(&new)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    if old_mid.is_empty()
        || new_mid.is_empty()
        || old_mid.len().saturating_mul(new_mid.len()) > MAX_DIFF_CELLS
    {
        return (total_chars(new_mid), total_chars(old_mid));
    }

    let (keep_old, keep_new) = lcs_lines(old_mid, new_mid);
    (
        total_chars(new_mid) - kept_chars(new_mid, &keep_new),
        total_chars(old_mid) - kept_chars(old_mid, &keep_old),
    )
}

fn total_chars(lines: &[&str]) -> u64 {
    lines.iter().map(|line| line.chars().count() as u64).sum()
}

fn kept_chars(lines: &[&str], keep: &[bool]) -> u64 {
    lines
        .iter()
        .zip(keep)
        .filter(|(_, kept)| **kept)
        .map(|(line, _)| line.chars().count() as u64)
        .sum()
}

/// Longest common subsequence of lines. Returns per-line "kept" flags for
/// each side.
fn lcs_lines(old: &[&str], new: &[&str]) -> (Vec<bool>, Vec<bool>) {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut keep_old = vec![false; n];
    let mut keep_new = vec![false; m];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            keep_old[i] = true;
            keep_new[j] = true;
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    (keep_old, keep_new)
}
