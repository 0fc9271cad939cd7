//! Workspace snapshot capture for provenance diffs.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::provenance::{
    FileSnapshot, MAX_INLINE_TEXT_BYTES, TEXT_SNIFF_BYTES, WorkspaceSnapshot, is_probably_text,
};

/// Control, dependency and cache directories never included in a snapshot.
pub const IGNORED_DIRS: [&str; 13] = [
    ".git",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "__pycache__",
    "node_modules",
    "sessions",
    "receipts",
    ".waypoints",
];
pub const IGNORED_FILES: [&str; 1] = ["metrics.jsonl"];

/// Walk `root` and hash every regular file outside the ignore lists.
///
/// Symlinks are skipped. Files that vanish or cannot be read mid-walk are
/// logged and left out rather than failing the capture.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn capture_workspace_snapshot(root: &Path) -> Result<WorkspaceSnapshot> {
    let mut files = BTreeMap::new();
    if !root.exists() {
        return Ok(WorkspaceSnapshot::empty());
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_key(root, entry.path()) else {
            continue;
        };
        match snapshot_file(entry.path()) {
            Ok(snapshot) => {
                files.insert(relative, snapshot);
            }
            Err(err) => warn!(path = %entry.path().display(), err = %format!("{err:#}"), "skipping file"),
        }
    }

    debug!(files = files.len(), "workspace snapshot captured");
    Ok(WorkspaceSnapshot {
        captured_at: Utc::now(),
        files,
    })
}

fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        IGNORED_DIRS.contains(&name.as_ref())
    } else {
        IGNORED_FILES.contains(&name.as_ref())
    }
}

/// `/`-separated path relative to `root`.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn snapshot_file(path: &Path) -> Result<FileSnapshot> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut sample = Vec::with_capacity(TEXT_SNIFF_BYTES);
    let mut retained = Vec::new();
    let mut size_bytes = 0u64;
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        let bytes = &chunk[..n];
        hasher.update(bytes);
        if sample.len() < TEXT_SNIFF_BYTES {
            let take = (TEXT_SNIFF_BYTES - sample.len()).min(n);
            sample.extend_from_slice(&bytes[..take]);
        }
        size_bytes += n as u64;
        if size_bytes <= MAX_INLINE_TEXT_BYTES {
            retained.extend_from_slice(bytes);
        }
    }

    let mut is_text = is_probably_text(&sample);
    let mut content = None;
    if is_text && size_bytes <= MAX_INLINE_TEXT_BYTES {
        match String::from_utf8(retained) {
            Ok(text) => content = Some(text),
            // Invalid UTF-8 past the sniffed prefix: treat as binary.
            Err(_) => is_text = false,
        }
    }
    Ok(FileSnapshot {
        size_bytes,
        digest: hex::encode(hasher.finalize()),
        is_text,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provenance::summarize_workspace_diff;
    use std::fs;

    #[test]
    fn adding_a_text_file_counts_chars_and_tokens() {
        let temp = tempfile::tempdir().expect("tempdir");
        let before = capture_workspace_snapshot(temp.path()).expect("before");
        assert!(before.files.is_empty());

        fs::write(temp.path().join("notes.txt"), "x".repeat(100)).expect("write");
        let after = capture_workspace_snapshot(temp.path()).expect("after");

        let summary = summarize_workspace_diff(&before, &after);
        assert_eq!(summary.files_added, 1);
        assert_eq!(summary.text_chars_added, 100);
        assert_eq!(summary.approx_tokens_changed, 25);
    }

    #[test]
    fn ignored_dirs_and_files_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join(".git/objects")).expect("mkdir");
        fs::create_dir_all(root.join("node_modules/pkg")).expect("mkdir");
        fs::create_dir_all(root.join("src")).expect("mkdir");
        fs::write(root.join(".git/objects/abc"), "blob").expect("write");
        fs::write(root.join("node_modules/pkg/index.js"), "x").expect("write");
        fs::write(root.join("metrics.jsonl"), "{}").expect("write");
        fs::write(root.join("src/main.rs"), "fn main() {}\n").expect("write");

        let snapshot = capture_workspace_snapshot(root).expect("snapshot");
        let keys: Vec<&str> = snapshot.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/main.rs"]);
    }

    #[test]
    fn binary_files_keep_hash_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("blob.bin"), [0u8, 159, 146, 150]).expect("write");
        let snapshot = capture_workspace_snapshot(temp.path()).expect("snapshot");
        let file = snapshot.files.get("blob.bin").expect("file");
        assert!(!file.is_text);
        assert!(file.content.is_none());
        assert_eq!(file.size_bytes, 4);
        assert_eq!(file.digest.len(), 64);
    }

    #[test]
    fn invalid_utf8_after_sniffed_prefix_is_binary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut bytes = "a".repeat(TEXT_SNIFF_BYTES + 10).into_bytes();
        bytes.extend_from_slice(&[0xff, 0xfe, b'z']);
        fs::write(temp.path().join("mixed.txt"), &bytes).expect("write");

        let snapshot = capture_workspace_snapshot(temp.path()).expect("snapshot");
        let file = snapshot.files.get("mixed.txt").expect("file");
        assert!(!file.is_text);
        assert!(file.content.is_none());
        assert_eq!(file.size_bytes, bytes.len() as u64);
    }

    #[test]
    fn large_text_files_are_not_inlined() {
        let temp = tempfile::tempdir().expect("tempdir");
        let big = "a".repeat(MAX_INLINE_TEXT_BYTES as usize + 1);
        fs::write(temp.path().join("big.txt"), big).expect("write");
        let snapshot = capture_workspace_snapshot(temp.path()).expect("snapshot");
        let file = snapshot.files.get("big.txt").expect("file");
        assert!(file.is_text);
        assert!(file.content.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("real.txt"), "data").expect("write");
        std::os::unix::fs::symlink(temp.path().join("real.txt"), temp.path().join("link.txt"))
            .expect("symlink");
        let snapshot = capture_workspace_snapshot(temp.path()).expect("snapshot");
        assert!(snapshot.files.contains_key("real.txt"));
        assert!(!snapshot.files.contains_key("link.txt"));
    }
}
