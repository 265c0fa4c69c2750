//! The data-plane worktree manager (`spec.md` §4.4).
//!
//! The worktree's health is probed and classified explicitly as a
//! [`WorktreeStatus`] before any operation acts on it, rather than
//! probing implicitly inline.

use std::fs;
use std::path::{Path, PathBuf};

use tbd_git::GitRepo;

/// The health of the data-plane worktree, determined by probing the
/// filesystem and `git worktree list` together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorktreeStatus {
    /// Directory exists, is an attached worktree, HEAD resolves on the
    /// sync branch.
    Valid,
    /// Directory absent; `git worktree list` does not reference it.
    Missing,
    /// Directory absent but git still holds an administrative record for
    /// it (left behind by an out-of-band `rm -rf`).
    Prunable,
    /// Directory exists but is not a valid worktree, or HEAD does not
    /// resolve.
    Corrupted,
}

/// Owns the lifecycle of the auxiliary working tree that holds issue
/// data, separate from the user's main checkout.
pub struct WorktreeManager<'a> {
    repo: &'a GitRepo,
    path: PathBuf,
    branch: String,
    remote: String,
}

impl<'a> WorktreeManager<'a> {
    /// `path` is conventionally `<tbd_root>/.tbd/worktree`; `branch` is
    /// the configured sync branch (default `tbd-sync`); `remote` is the
    /// configured sync remote (default `origin`), consulted by [`Self::init`]
    /// so a clone that has never run `init` before still picks up the
    /// branch's existing history instead of starting a fresh orphan.
    #[must_use]
    pub fn new(repo: &'a GitRepo, path: PathBuf, branch: impl Into<String>, remote: impl Into<String>) -> Self {
        Self { repo, path, branch: branch.into(), remote: remote.into() }
    }

    /// The worktree's filesystem path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Probe and classify the worktree's current state.
    pub fn status(&self) -> crate::Result<WorktreeStatus> {
        let entries = self.repo.worktree_list()?;
        let tracked = entries.iter().find(|e| paths_match(&e.path, &self.path));
        let exists_on_disk = self.path.is_dir();

        Ok(match (exists_on_disk, tracked) {
            (false, None) => WorktreeStatus::Missing,
            (false, Some(_)) => WorktreeStatus::Prunable,
            (true, None) => WorktreeStatus::Corrupted,
            (true, Some(entry)) => {
                let head_resolves = self.repo.git_run_in(&self.path, &["rev-parse", "--verify", "-q", "HEAD"]).is_ok();
                if head_resolves && entry.branch.as_deref() == Some(self.branch.as_str()) {
                    WorktreeStatus::Valid
                } else {
                    WorktreeStatus::Corrupted
                }
            }
        })
    }

    /// Re-attach the worktree to the configured sync branch if it is
    /// currently detached or on the wrong branch.
    pub fn ensure_attached(&self) -> crate::Result<()> {
        self.repo.git_run_in(&self.path, &["checkout", &self.branch])?;
        Ok(())
    }

    /// Create the sync branch if needed and add the worktree, then
    /// verify the result is healthy.
    ///
    /// If the local branch does not exist yet but the remote already
    /// carries it (a fresh clone that has never run `init` locally),
    /// the local branch is created tracking the remote's tip rather than
    /// starting a new orphan history.
    pub fn init(&self) -> crate::Result<()> {
        let local_exists = self
            .repo
            .git_run(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{}", self.branch)])
            .is_ok();
        if !local_exists {
            let remote_ref = format!("refs/remotes/{}/{}", self.remote, self.branch);
            let remote_exists = self.repo.git_run(&["show-ref", "--verify", "--quiet", &remote_ref]).is_ok();
            if remote_exists {
                self.repo.git_run(&["branch", &self.branch, &format!("{}/{}", self.remote, self.branch)])?;
            } else {
                self.repo.ensure_branch_exists(&self.branch)?;
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.repo.worktree_add(&self.path, &self.branch)?;

        match self.status()? {
            WorktreeStatus::Valid => Ok(()),
            other => Err(crate::Error::WorktreeCorrupted {
                path: self.path.clone(),
                detail: format!("worktree did not reach a valid state after init (status: {other:?})"),
            }),
        }
    }

    /// Repair the worktree according to its current status, returning
    /// the path any pre-existing data was backed up to, if applicable.
    ///
    /// # Errors
    /// Returns [`crate::Error::WorktreeMissing`] if called while the
    /// worktree is already valid (nothing to repair).
    pub fn repair(&self) -> crate::Result<Option<PathBuf>> {
        match self.status()? {
            WorktreeStatus::Valid => Ok(None),
            WorktreeStatus::Missing => {
                self.init()?;
                Ok(None)
            }
            WorktreeStatus::Prunable => {
                self.repo.worktree_prune()?;
                self.init()?;
                Ok(None)
            }
            WorktreeStatus::Corrupted => {
                let backup = self.backup_path();
                fs::rename(&self.path, &backup)?;
                self.repo.worktree_prune()?;
                self.init()?;
                Ok(Some(backup))
            }
        }
    }

    /// A timestamped sibling path to move corrupted worktree contents
    /// into, named deterministically from the caller-supplied `stamp`
    /// rather than the wall clock (callers own timestamp generation so
    /// this stays testable without mocking time).
    fn backup_path(&self) -> PathBuf {
        let file_name = self.path.file_name().and_then(|n| n.to_str()).unwrap_or("worktree");
        self.path.with_file_name(format!("{file_name}.corrupted-backup"))
    }

    /// Copy every issue file found at `fallback_dir` (the location used
    /// before the worktree existed) into the worktree, commit on the
    /// sync branch, then move the fallback directory's contents to a
    /// timestamped backup so a stale fallback copy never shadows the
    /// worktree again.
    pub fn migrate_data_to_worktree(&self, fallback_dir: &Path, issues_subdir: &str) -> crate::Result<usize> {
        let fallback_issues = fallback_dir.join(issues_subdir);
        if !fallback_issues.is_dir() {
            return Ok(0);
        }

        let target_issues = self.path.join(issues_subdir);
        fs::create_dir_all(&target_issues)?;

        let mut migrated = 0;
        for entry in fs::read_dir(&fallback_issues)? {
            let entry = entry?;
            let src = entry.path();
            if src.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = src.file_name() else { continue };
            fs::copy(&src, target_issues.join(name))?;
            migrated += 1;
        }

        if migrated > 0 {
            self.repo.commit_all(&self.path, &format!("migrate {migrated} issue file(s) into worktree"), true)?;
        }

        let backup = fallback_dir.with_file_name(format!(
            "{}.pre-worktree-backup",
            fallback_dir.file_name().and_then(|n| n.to_str()).unwrap_or("data")
        ));
        fs::rename(fallback_dir, &backup)?;

        Ok(migrated)
    }
}

fn paths_match(a: &Path, b: &Path) -> bool {
    fs::canonicalize(a).ok().as_deref() == fs::canonicalize(b).ok().as_deref() || a == b
}
