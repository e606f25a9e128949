//! Commit-to-change extraction via git2.
//!
//! Collects the commits reachable from HEAD but not from the base branch
//! and renders each one as its summary line plus the patch against its
//! first parent.

use std::path::Path;

use beatrica_core::{BeatricaError, CommitChange};
use git2::{Commit, DiffFormat, DiffOptions, Repository, Sort};
use indexmap::IndexMap;

const TRUNCATION_MARKER: &str = "\n[diff truncated]\n";

/// Options for change tracking.
///
/// # Examples
///
/// ```
/// use beatrica_difftrack::TrackerOptions;
///
/// let opts = TrackerOptions::default();
/// assert_eq!(opts.max_patch_bytes, 64 * 1024);
/// assert!(!opts.include_merges);
/// ```
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Patch text per commit is cut after this many bytes (default: 64 KiB).
    pub max_patch_bytes: usize,
    /// Include merge commits (default: false).
    pub include_merges: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            max_patch_bytes: 64 * 1024,
            include_merges: false,
        }
    }
}

/// Tracks the commits a branch adds on top of a base branch.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use beatrica_difftrack::DiffTracker;
///
/// let mut tracker = DiffTracker::open(Path::new(".")).unwrap();
/// tracker.analyze("main").unwrap();
/// for (commit_id, description) in tracker.commit_changes() {
///     println!("{}: {}", &commit_id[..8], description.lines().next().unwrap_or(""));
/// }
/// ```
pub struct DiffTracker {
    repo: Repository,
    options: TrackerOptions,
    changes: IndexMap<String, String>,
}

impl DiffTracker {
    /// Open the repository containing `path` with default options.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Git`] if no repository is found.
    pub fn open(path: &Path) -> Result<Self, BeatricaError> {
        Self::with_options(path, TrackerOptions::default())
    }

    /// Open the repository containing `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Git`] if no repository is found.
    pub fn with_options(path: &Path, options: TrackerOptions) -> Result<Self, BeatricaError> {
        let repo = Repository::discover(path).map_err(|e| {
            BeatricaError::Git(format!(
                "failed to open repository at {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self {
            repo,
            options,
            changes: IndexMap::new(),
        })
    }

    /// Working directory of the opened repository, if it is not bare.
    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    /// Collect the commits on HEAD that are not on `base_branch`.
    ///
    /// Replaces the result of any previous call. Commits are stored
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Git`] if the base branch cannot be resolved
    /// or the history cannot be walked.
    pub fn analyze(&mut self, base_branch: &str) -> Result<(), BeatricaError> {
        let base = self
            .repo
            .revparse_single(base_branch)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|e| {
                BeatricaError::Git(format!("failed to resolve base branch '{base_branch}': {e}"))
            })?;

        let mut revwalk = self
            .repo
            .revwalk()
            .map_err(|e| BeatricaError::Git(format!("failed to create revwalk: {e}")))?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
            .map_err(|e| BeatricaError::Git(format!("failed to sort revwalk: {e}")))?;
        revwalk
            .push_head()
            .map_err(|e| BeatricaError::Git(format!("failed to push HEAD: {e}")))?;
        revwalk
            .hide(base.id())
            .map_err(|e| BeatricaError::Git(format!("failed to hide base branch: {e}")))?;

        let mut changes = IndexMap::new();
        for oid_result in revwalk {
            let oid = oid_result.map_err(|e| BeatricaError::Git(format!("revwalk error: {e}")))?;
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|e| BeatricaError::Git(format!("failed to find commit: {e}")))?;

            if commit.parent_count() > 1 && !self.options.include_merges {
                tracing::debug!(commit = %oid, "skipping merge commit");
                continue;
            }

            let description = self.describe(&commit)?;
            changes.insert(oid.to_string(), description);
        }

        tracing::debug!(count = changes.len(), base = base_branch, "tracked commits");
        self.changes = changes;
        Ok(())
    }

    /// The tracked `commit id -> change description` mapping.
    ///
    /// Empty until [`analyze`](Self::analyze) has run.
    pub fn commit_changes(&self) -> &IndexMap<String, String> {
        &self.changes
    }

    /// The tracked changes as owned [`CommitChange`] values, oldest first.
    pub fn to_changes(&self) -> Vec<CommitChange> {
        self.changes
            .iter()
            .map(|(id, description)| CommitChange::new(id.clone(), description.clone()))
            .collect()
    }

    fn describe(&self, commit: &Commit<'_>) -> Result<String, BeatricaError> {
        let summary = commit.summary().unwrap_or("").to_string();
        let patch = self.commit_patch(commit)?;
        let patch = truncate_patch(patch, self.options.max_patch_bytes);
        Ok(format!("{summary}\n\n{patch}"))
    }

    fn commit_patch(&self, commit: &Commit<'_>) -> Result<String, BeatricaError> {
        let commit_tree = commit
            .tree()
            .map_err(|e| BeatricaError::Git(format!("failed to get commit tree: {e}")))?;

        let parent_tree = if commit.parent_count() > 0 {
            let parent = commit
                .parent(0)
                .map_err(|e| BeatricaError::Git(format!("failed to get parent: {e}")))?;
            Some(
                parent
                    .tree()
                    .map_err(|e| BeatricaError::Git(format!("failed to get parent tree: {e}")))?,
            )
        } else {
            None
        };

        let mut diff_opts = DiffOptions::new();
        let diff = self
            .repo
            .diff_tree_to_tree(
                parent_tree.as_ref(),
                Some(&commit_tree),
                Some(&mut diff_opts),
            )
            .map_err(|e| BeatricaError::Git(format!("failed to compute diff: {e}")))?;

        let mut text = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            let origin = line.origin();
            if matches!(origin, '+' | '-' | ' ') {
                text.push(origin);
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })
        .map_err(|e| BeatricaError::Git(format!("failed to render patch: {e}")))?;

        Ok(text)
    }
}

fn truncate_patch(mut patch: String, max_bytes: usize) -> String {
    if patch.len() <= max_bytes {
        return patch;
    }
    let mut cut = max_bytes;
    while !patch.is_char_boundary(cut) {
        cut -= 1;
    }
    patch.truncate(cut);
    patch.push_str(TRUNCATION_MARKER);
    patch
}
