//! `git worktree` plumbing: add/remove/list/prune and porcelain parsing.
//!
//! `worktree add` / `worktree remove --force` / `worktree prune`, plus
//! `parse_worktree_porcelain` for reading `git worktree list --porcelain`.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::repo::GitRepo;

/// One entry from `git worktree list --porcelain`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorktreeEntry {
    /// Absolute path to the worktree.
    pub path: PathBuf,
    /// HEAD commit OID (40 hex chars), or `None` for an unborn worktree.
    pub head: Option<String>,
    /// The branch the worktree's HEAD is attached to, if any (detached
    /// worktrees have `None`).
    pub branch: Option<String>,
}

impl GitRepo {
    /// Add a worktree at `path`, attached to `branch` (created if it does
    /// not already point anywhere checked out).
    pub fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        self.git_run(&[
            "worktree",
            "add",
            path.to_str().unwrap_or_default(),
            branch,
        ])
    }

    /// Remove a worktree, forcing removal even if it has local
    /// modifications, then prune its administrative record.
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path.to_str().unwrap_or_default();
        if self.git_run(&["worktree", "remove", "--force", path_str]).is_err() {
            // Manual fallback: the directory may already be gone or in a
            // state `worktree remove` refuses to touch.
            let _ = std::fs::remove_dir_all(path);
        }
        self.git_run(&["worktree", "prune"])
    }

    /// `git worktree prune` without a preceding remove — used to clear
    /// stale administrative records for worktrees whose directories were
    /// deleted out of band (the `prunable` state in `spec.md` §4.4).
    pub fn worktree_prune(&self) -> Result<()> {
        self.git_run(&["worktree", "prune"])
    }

    /// List all worktrees attached to this repository.
    pub fn worktree_list(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.git_stdout(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_porcelain(&out))
    }
}

/// Parse the `--porcelain` output of `git worktree list`.
///
/// Entries are separated by blank lines; each entry has a `worktree <path>`
/// line, an optional `HEAD <oid>` line, and either a `branch <ref>` or
/// `detached` line.
fn parse_worktree_porcelain(raw: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head: Option<String> = None;
    let mut branch: Option<String> = None;

    let flush = |path: &mut Option<PathBuf>, head: &mut Option<String>, branch: &mut Option<String>, out: &mut Vec<WorktreeEntry>| {
        if let Some(p) = path.take() {
            out.push(WorktreeEntry { path: p, head: head.take(), branch: branch.take() });
        }
    };

    for line in raw.lines() {
        if line.is_empty() {
            flush(&mut path, &mut head, &mut branch, &mut entries);
            continue;
        }
        if let Some(p) = line.strip_prefix("worktree ") {
            flush(&mut path, &mut head, &mut branch, &mut entries);
            path = Some(PathBuf::from(p));
        } else if let Some(h) = line.strip_prefix("HEAD ") {
            head = Some(h.to_owned());
        } else if let Some(b) = line.strip_prefix("branch ") {
            branch = Some(b.trim_start_matches("refs/heads/").to_owned());
        }
    }
    flush(&mut path, &mut head, &mut branch, &mut entries);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_attached_worktree() {
        let raw = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n";
        let entries = parse_worktree_porcelain(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/repo"));
        assert_eq!(entries[0].head.as_deref(), Some("abc123"));
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
    }

    #[test]
    fn parses_multiple_worktrees_separated_by_blank_lines() {
        let raw = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.tbd-worktree\nHEAD def456\nbranch refs/heads/tbd-sync\n";
        let entries = parse_worktree_porcelain(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].branch.as_deref(), Some("tbd-sync"));
    }

    #[test]
    fn parses_detached_worktree() {
        let raw = "worktree /repo/detached\nHEAD abc123\ndetached\n";
        let entries = parse_worktree_porcelain(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].branch, None);
    }

    #[test]
    fn parses_empty_output() {
        assert!(parse_worktree_porcelain("").is_empty());
    }
}
