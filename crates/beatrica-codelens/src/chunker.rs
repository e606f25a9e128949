//! Line-window chunking of commit changes.
//!
//! Each chunk carries a context header naming the commit, its summary and
//! the file the window starts in, so embeddings keep track of where a
//! fragment of patch came from.

use beatrica_core::CommitChange;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A window of a commit change description.
///
/// # Examples
///
/// ```
/// use beatrica_codelens::chunker::ChangeChunk;
///
/// let chunk = ChangeChunk {
///     commit_id: "abc123".into(),
///     chunk_index: 0,
///     start_line: 1,
///     end_line: 3,
///     content: "+fn bar() {}".into(),
///     context_header: "# Commit: abc123".into(),
///     content_hash: "deadbeef".into(),
/// };
/// assert_eq!(chunk.commit_id, "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeChunk {
    /// Commit the window belongs to.
    pub commit_id: String,
    /// Position of the window within the commit (0-based).
    pub chunk_index: u32,
    /// First line of the window (1-indexed).
    pub start_line: u32,
    /// Last line of the window (1-indexed, inclusive).
    pub end_line: u32,
    /// Raw window text.
    pub content: String,
    /// Commit / file context prepended for embedding.
    pub context_header: String,
    /// SHA-256 over commit id, position and content.
    pub content_hash: String,
}

impl ChangeChunk {
    /// Text sent to the embedding API (header + content).
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.context_header, self.content)
    }
}

/// Window sizing for [`chunk_change`].
///
/// # Examples
///
/// ```
/// use beatrica_codelens::chunker::ChunkOptions;
///
/// let opts = ChunkOptions::default();
/// assert_eq!(opts.max_lines, 40);
/// assert_eq!(opts.overlap, 5);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Maximum lines per window.
    pub max_lines: usize,
    /// Lines repeated at the start of the next window.
    pub overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_lines: 40,
            overlap: 5,
        }
    }
}

/// Split a commit change into overlapping line windows.
///
/// Returns an empty vec for an empty or whitespace-only description.
/// `overlap` is clamped below `max_lines` so the window always advances.
///
/// # Examples
///
/// ```
/// use beatrica_core::CommitChange;
/// use beatrica_codelens::chunker::{chunk_change, ChunkOptions};
///
/// let change = CommitChange::new("abc123", "rename foo\n\n-fn foo() {}\n+fn bar() {}");
/// let chunks = chunk_change(&change, ChunkOptions::default());
/// assert_eq!(chunks.len(), 1);
/// assert!(chunks[0].context_header.contains("abc123"));
/// ```
pub fn chunk_change(change: &CommitChange, options: ChunkOptions) -> Vec<ChangeChunk> {
    if change.description.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = change.description.lines().collect();
    let max_lines = options.max_lines.max(1);
    let step = max_lines - options.overlap.min(max_lines - 1);
    let summary = lines.first().copied().unwrap_or("").trim();
    let file_at = files_by_line(&lines);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_lines).min(lines.len());
        let content = lines[start..end].join("\n");

        let mut header = format!("# Commit: {}\n# Summary: {summary}", change.commit_id);
        if let Some(file) = file_at[start] {
            header.push_str(&format!("\n# File: {file}"));
        }

        chunks.push(ChangeChunk {
            commit_id: change.commit_id.clone(),
            chunk_index: chunks.len() as u32,
            start_line: start as u32 + 1,
            end_line: end as u32,
            content_hash: compute_hash(&change.commit_id, start, &content),
            content,
            context_header: header,
        });

        if end == lines.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Chunk every change in order.
pub fn chunk_changes(changes: &[CommitChange], options: ChunkOptions) -> Vec<ChangeChunk> {
    changes
        .iter()
        .flat_map(|c| chunk_change(c, options))
        .collect()
}

/// Hash of the whole description, used to detect unchanged commits.
pub fn change_hash(change: &CommitChange) -> String {
    let mut hasher = Sha256::new();
    hasher.update(change.commit_id.as_bytes());
    hasher.update(change.description.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn compute_hash(commit_id: &str, start: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(commit_id.as_bytes());
    hasher.update(start.to_le_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// For each line, the file whose `diff --git` section it falls in.
fn files_by_line<'a>(lines: &[&'a str]) -> Vec<Option<&'a str>> {
    let mut current = None;
    lines
        .iter()
        .map(|line| {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                current = rest
                    .split_whitespace()
                    .last()
                    .map(|p| p.strip_prefix("b/").unwrap_or(p));
            }
            current
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn empty_description_produces_no_chunks() {
        let change = CommitChange::new("abc", "   \n ");
        assert!(chunk_change(&change, ChunkOptions::default()).is_empty());
    }

    #[test]
    fn short_change_is_single_chunk() {
        let change = CommitChange::new("abc", numbered(10));
        let chunks = chunk_change(&change, ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 10);
    }

    #[test]
    fn windows_overlap_and_cover_everything() {
        let change = CommitChange::new("abc", numbered(25));
        let opts = ChunkOptions {
            max_lines: 10,
            overlap: 2,
        };
        let chunks = chunk_change(&change, opts);
        let ranges: Vec<(u32, u32)> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
        assert_eq!(ranges, vec![(1, 10), (9, 18), (17, 25)]);
        assert_eq!(chunks[2].chunk_index, 2);
        assert!(chunks[1].content.starts_with("line 9"));
    }

    #[test]
    fn oversized_overlap_still_advances() {
        let change = CommitChange::new("abc", numbered(5));
        let opts = ChunkOptions {
            max_lines: 2,
            overlap: 7,
        };
        let chunks = chunk_change(&change, opts);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().unwrap().end_line, 5);
    }

    #[test]
    fn header_names_commit_summary_and_file() {
        let description = "rename foo\n\ndiff --git a/src/lib.rs b/src/lib.rs\n-fn foo() {}\n+fn bar() {}";
        let change = CommitChange::new("abc123", description);
        let opts = ChunkOptions {
            max_lines: 2,
            overlap: 0,
        };
        let chunks = chunk_change(&change, opts);
        assert!(chunks[0].context_header.contains("# Commit: abc123"));
        assert!(chunks[0].context_header.contains("# Summary: rename foo"));
        assert!(!chunks[0].context_header.contains("# File:"));
        assert!(chunks[1].context_header.contains("# File: src/lib.rs"));
    }

    #[test]
    fn hashes_differ_between_commits_with_same_text() {
        let a = chunk_change(&CommitChange::new("a", "same"), ChunkOptions::default());
        let b = chunk_change(&CommitChange::new("b", "same"), ChunkOptions::default());
        assert_ne!(a[0].content_hash, b[0].content_hash);
    }

    #[test]
    fn change_hash_is_deterministic() {
        let change = CommitChange::new("abc", "text");
        assert_eq!(change_hash(&change), change_hash(&change.clone()));
        assert_ne!(
            change_hash(&change),
            change_hash(&CommitChange::new("abc", "other"))
        );
    }

    #[test]
    fn chunk_changes_flattens_in_order() {
        let changes = vec![
            CommitChange::new("first", "one"),
            CommitChange::new("second", "two"),
        ];
        let chunks = chunk_changes(&changes, ChunkOptions::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].commit_id, "first");
        assert_eq!(chunks[1].commit_id, "second");
    }
}
