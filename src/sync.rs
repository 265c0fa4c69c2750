//! The sync engine: pull, field-level merge, push-with-retry, and
//! outbox recovery (`spec.md` §4.5).
//!
//! Orchestration shape: probe status, run the operation, parse the
//! output, bail with an actionable error on failure. The push retry
//! loop lives in [`tbd_git::push_with_retry`].

use std::path::PathBuf;

use tbd_git::{FailureKind, GitRepo, PushOutcome};

use crate::id::IdMapping;
use crate::issue::IssueId;
use crate::merge::{ConflictEntry, merge_issue};
use crate::storage;
use crate::worktree::{WorktreeManager, WorktreeStatus};

const ISSUES_DIR: &str = "issues";
const MAPPING_FILE: &str = "mappings/ids.yml";
const OUTBOX_DIR: &str = "workspaces/outbox";

/// File-level counts reported by a sync round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeTally {
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
}

/// The outcome of a full sync round.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Nothing to do; local and remote already matched.
    AlreadyInSync,
    /// Completed, possibly after merging remote changes.
    Synced {
        pushed: ChangeTally,
        pulled: ChangeTally,
        conflicts: Vec<ConflictEntry>,
    },
    /// Push could not complete. Worktree state is preserved; on a
    /// permanent failure, the caller's in-flight issues were already
    /// written to the outbox before this was returned.
    PushFailed {
        kind: FailureKind,
        detail: String,
        outbox_saved: bool,
    },
}

/// A structured summary for `sync --status` (`spec.md` §4.5 "Status
/// reporting"). Read-only: never mutates repository state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub ahead: u32,
    pub behind: u32,
    pub local_changes: Vec<String>,
    pub remote_changes: Vec<String>,
}

/// Coordinates a full sync round between the local worktree and the
/// configured remote.
pub struct SyncEngine<'a> {
    repo: &'a GitRepo,
    worktree: &'a WorktreeManager<'a>,
    remote: String,
    branch: String,
}

impl<'a> SyncEngine<'a> {
    #[must_use]
    pub fn new(repo: &'a GitRepo, worktree: &'a WorktreeManager<'a>, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self { repo, worktree, remote: remote.into(), branch: branch.into() }
    }

    fn issues_dir(&self) -> PathBuf {
        self.worktree.path().join(ISSUES_DIR)
    }

    fn mapping_path(&self) -> PathBuf {
        self.worktree.path().join(MAPPING_FILE)
    }

    /// The outbox lives on the main branch, alongside `.tbd/config.yml`,
    /// not inside the sync worktree — a push failure must not leave
    /// recovered issues staged for the next sync to commit onto the sync
    /// branch.
    fn outbox_dir(&self) -> PathBuf {
        self.repo.root().join(".tbd").join(OUTBOX_DIR)
    }

    fn load_mapping(&self) -> crate::Result<IdMapping> {
        match std::fs::read_to_string(self.mapping_path()) {
            Ok(text) => IdMapping::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IdMapping::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_mapping(&self, mapping: &IdMapping) -> crate::Result<()> {
        let path = self.mapping_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, mapping.to_yaml()?)?;
        Ok(())
    }

    /// Read the remote's mapping file at its current tip, for
    /// reconciliation recovery. `None` if the branch has no mapping yet.
    fn remote_historical_mapping(&self) -> crate::Result<Option<IdMapping>> {
        let remote_ref = format!("{}/{}", self.remote, self.branch);
        match self.repo.show_path_at(self.worktree.path(), &remote_ref, MAPPING_FILE)? {
            Some(text) => Ok(Some(IdMapping::parse(&text)?)),
            None => Ok(None),
        }
    }

    /// Run a complete sync round: health gate, commit pending, fetch,
    /// merge on conflict, reconcile, push with retry, outbox import.
    pub fn sync(&self) -> crate::Result<SyncOutcome> {
        self.health_gate()?;

        let committed = self.commit_pending()?;
        // The remote may not carry the sync branch yet (first push from a
        // fresh clone) — a fetch failure here is not fatal, it just means
        // there is nothing to merge.
        let remote_has_branch = self.repo.fetch(self.worktree.path(), &self.remote, &self.branch).is_ok();

        let remote_ref = format!("{}/{}", self.remote, self.branch);
        let behind = if remote_has_branch {
            self.repo.rev_list_count(self.worktree.path(), &format!("HEAD..{remote_ref}"))?
        } else {
            0
        };

        let mut conflicts = Vec::new();
        let mut pulled = ChangeTally::default();

        if behind > 0 {
            let diff = self.repo.diff_name_status(self.worktree.path(), &format!("HEAD..{remote_ref}"))?;
            pulled = tally_from_diff(&diff);

            let clean = self.repo.merge(self.worktree.path(), &remote_ref)?;
            if clean {
                self.reconcile_mapping()?;
            } else {
                conflicts = self.resolve_conflicts_against(&remote_ref)?;
                self.merge_mappings_against(&remote_ref)?;
                self.reconcile_mapping()?;
                self.guard_no_conflict_markers()?;
                self.repo.commit_all(self.worktree.path(), "merge: field-level resolution", true)?;
            }
        }

        let ahead = if remote_has_branch {
            self.repo.rev_list_count(self.worktree.path(), &format!("{remote_ref}..HEAD"))?
        } else {
            1 // nothing to compare against yet; treat local history as ahead so the first push runs
        };
        if ahead == 0 && !committed && behind == 0 {
            return Ok(SyncOutcome::AlreadyInSync);
        }

        let pushed_tally = self.local_change_tally()?;
        match self.push_with_resolution() {
            PushOutcome::Success { .. } => {
                self.import_outbox_if_present()?;
                Ok(SyncOutcome::Synced { pushed: pushed_tally, pulled, conflicts })
            }
            PushOutcome::Failed { kind, error } => {
                let outbox_saved = if kind == FailureKind::Permanent { self.save_to_outbox()? } else { false };
                Ok(SyncOutcome::PushFailed { kind, detail: error.to_string(), outbox_saved })
            }
        }
    }

    /// Step 1: verify the worktree is usable before touching anything.
    fn health_gate(&self) -> crate::Result<()> {
        match self.worktree.status()? {
            WorktreeStatus::Valid => Ok(()),
            WorktreeStatus::Missing => self.worktree.init(),
            WorktreeStatus::Prunable | WorktreeStatus::Corrupted => Err(crate::Error::WorktreeCorrupted {
                path: self.worktree.path().to_path_buf(),
                detail: "worktree requires repair before syncing; run with an explicit repair flag".into(),
            }),
        }
    }

    /// Step 2: stage and commit anything dirty in the worktree.
    fn commit_pending(&self) -> crate::Result<bool> {
        let status = self.repo.status_porcelain(self.worktree.path())?;
        if status.is_empty() {
            return Ok(false);
        }
        self.repo.commit_all(self.worktree.path(), "sync: commit pending changes", true)?;
        Ok(true)
    }

    fn local_change_tally(&self) -> crate::Result<ChangeTally> {
        let remote_ref = format!("{}/{}", self.remote, self.branch);
        let diff = self.repo.diff_name_status(self.worktree.path(), &format!("{remote_ref}..HEAD")).unwrap_or_default();
        Ok(tally_from_diff(&diff))
    }

    /// Step 4d: for every local issue, pull the remote's version (if any)
    /// and run field-level merge, accumulating attic entries.
    fn resolve_conflicts_against(&self, remote_ref: &str) -> crate::Result<Vec<ConflictEntry>> {
        self.repo.merge_abort(self.worktree.path()).ok();

        let ancestor_rev = self.repo.merge_base(self.worktree.path(), "HEAD", remote_ref)?;
        let local_issues = storage::list(&self.issues_dir())?;
        let mut all_conflicts = Vec::new();

        for local in &local_issues {
            let path = format!("{ISSUES_DIR}/{}.md", local.id);
            let Some(remote_text) = self.repo.show_path_at(self.worktree.path(), remote_ref, &path)? else {
                continue;
            };
            let remote_issue = storage::parse(&remote_text)?;
            if remote_issue == *local {
                continue;
            }
            let ancestor_issue = match &ancestor_rev {
                Some(rev) => self.repo.show_path_at(self.worktree.path(), rev, &path)?.map(|t| storage::parse(&t)).transpose()?,
                None => None,
            };
            let (merged, conflicts) = merge_issue(ancestor_issue.as_ref(), local, &remote_issue);
            storage::write(&self.issues_dir(), &merged)?;
            all_conflicts.extend(conflicts);
        }

        for entry in &all_conflicts {
            self.write_attic_entry(entry)?;
        }

        Ok(all_conflicts)
    }

    fn write_attic_entry(&self, entry: &ConflictEntry) -> crate::Result<()> {
        let dir = self.worktree.path().join("attic");
        std::fs::create_dir_all(&dir)?;
        let date = entry.timestamp.split('T').next().unwrap_or("00000000").replace('-', "");
        let file_name = format!("{date}-{}-{}.yml", entry.issue_id, entry.field);
        let yaml = serde_yaml::to_string(entry).map_err(|e| crate::Error::Validation { field: "attic".into(), reason: e.to_string() })?;
        std::fs::write(dir.join(file_name), yaml)?;
        Ok(())
    }

    /// Merge the remote's mapping file into the local one (§4.3).
    fn merge_mappings_against(&self, remote_ref: &str) -> crate::Result<()> {
        let Some(remote_text) = self.repo.show_path_at(self.worktree.path(), remote_ref, MAPPING_FILE)? else {
            return Ok(());
        };
        let remote_mapping = IdMapping::parse(&remote_text)?;
        let mut local_mapping = self.load_mapping()?;
        local_mapping.merge_from(&remote_mapping);
        self.write_mapping(&local_mapping)?;
        Ok(())
    }

    /// Reconcile every issue-on-disk against the mapping, recovering
    /// short ids from the remote's historical mapping where possible.
    fn reconcile_mapping(&self) -> crate::Result<()> {
        let issues = storage::list(&self.issues_dir())?;
        let ids: Vec<IssueId> = issues.into_iter().map(|i| i.id).collect();
        let historical = self.remote_historical_mapping()?;

        let mut mapping = self.load_mapping()?;
        let recovered = mapping.reconcile(ids.iter(), historical.as_ref());
        if recovered > 0 {
            self.write_mapping(&mapping)?;
        }
        Ok(())
    }

    /// Guard against committing a tree that still has textual conflict
    /// markers, per `spec.md` §9's merge guard.
    fn guard_no_conflict_markers(&self) -> crate::Result<()> {
        let mut offenders = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.issues_dir()) {
            for entry in entries.filter_map(std::result::Result::ok) {
                let path = entry.path();
                if let Ok(text) = std::fs::read_to_string(&path) {
                    if text.contains("<<<<<<< ") {
                        offenders.push(path);
                    }
                }
            }
        }
        if offenders.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Bug { detail: "conflict markers survived field-level merge".into(), files: offenders })
        }
    }

    /// Step 6: push with the standard retry/field-merge-on-conflict
    /// callback.
    fn push_with_resolution(&self) -> PushOutcome {
        let remote_ref = format!("{}/{}", self.remote, self.branch);
        self.repo.push_with_retry(self.worktree.path(), &self.remote, &self.branch, || {
            self.resolve_conflicts_against(&remote_ref).map(|_| ()).map_err(|e| tbd_git::Error::Command {
                command: "field-level merge retry".into(),
                stderr: e.to_string(),
                exit_code: None,
            })
        })
    }

    /// Save new/modified issues (everything currently in the worktree)
    /// to the outbox workspace, merging with any snapshot already there.
    fn save_to_outbox(&self) -> crate::Result<bool> {
        let issues = storage::list(&self.issues_dir())?;
        if issues.is_empty() {
            return Ok(false);
        }
        let outbox = self.outbox_dir().join(ISSUES_DIR);
        std::fs::create_dir_all(&outbox)?;
        for issue in &issues {
            storage::write(&outbox, issue)?;
        }
        Ok(true)
    }

    /// Two-phase outbox import (`spec.md` §4.5).
    fn import_outbox_if_present(&self) -> crate::Result<()> {
        let outbox_issues_dir = self.outbox_dir().join(ISSUES_DIR);
        if !outbox_issues_dir.is_dir() {
            return Ok(());
        }
        let outbox_issues = storage::list(&outbox_issues_dir)?;
        if outbox_issues.is_empty() {
            std::fs::remove_dir_all(self.outbox_dir()).ok();
            return Ok(());
        }

        for issue in &outbox_issues {
            storage::write(&self.issues_dir(), issue)?;
        }

        let status = self.repo.status_porcelain(self.worktree.path())?;
        if status.is_empty() {
            std::fs::remove_dir_all(self.outbox_dir()).ok();
            return Ok(());
        }
        self.repo.commit_all(self.worktree.path(), "sync: import outbox", true)?;

        match self.push_with_resolution() {
            PushOutcome::Success { .. } => {
                std::fs::remove_dir_all(self.outbox_dir()).ok();
                Ok(())
            }
            PushOutcome::Failed { .. } => Ok(()), // outbox preserved; retried next sync
        }
    }

    /// `sync --status`: read-only ahead/behind/local/remote summary.
    pub fn status(&self) -> crate::Result<SyncStatus> {
        self.repo.fetch(self.worktree.path(), &self.remote, &self.branch).ok();
        let remote_ref = format!("{}/{}", self.remote, self.branch);

        let ahead = self.repo.rev_list_count(self.worktree.path(), &format!("{remote_ref}..HEAD")).unwrap_or(0);
        let behind = self.repo.rev_list_count(self.worktree.path(), &format!("HEAD..{remote_ref}")).unwrap_or(0);
        let local_changes = self.repo.status_porcelain(self.worktree.path()).unwrap_or_default();
        let remote_changes = self
            .repo
            .git_stdout_in(self.worktree.path(), &["log", "--oneline", &format!("HEAD..{remote_ref}"), "-20"])
            .map(|out| out.lines().map(str::to_owned).collect())
            .unwrap_or_default();

        Ok(SyncStatus { ahead, behind, local_changes, remote_changes })
    }
}

fn tally_from_diff(diff: &[(char, String)]) -> ChangeTally {
    let mut tally = ChangeTally::default();
    for (code, _path) in diff {
        match code {
            'A' => tally.added += 1,
            'D' => tally.deleted += 1,
            _ => tally.updated += 1,
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_added_updated_deleted() {
        let diff = vec![
            ('A', "issues/a.md".to_owned()),
            ('M', "issues/b.md".to_owned()),
            ('D', "issues/c.md".to_owned()),
            ('A', "issues/d.md".to_owned()),
        ];
        let tally = tally_from_diff(&diff);
        assert_eq!(tally, ChangeTally { added: 2, updated: 1, deleted: 1 });
    }

    #[test]
    fn tally_of_empty_diff_is_zero() {
        assert_eq!(tally_from_diff(&[]), ChangeTally::default());
    }
}
