//! Pure diagnostic composition over the other components (`spec.md`
//! §4.6).
//!
//! Every check here is a plain function returning data; nothing prints.
//! One function per independent check, each with an actionable message
//! and an optional fix.

use std::path::{Path, PathBuf};

use tbd_git::{GitRepo, check_version};

use crate::config::TbdConfig;
use crate::storage;
use crate::worktree::{WorktreeManager, WorktreeStatus};

/// Severity of a single check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warn,
    Error,
}

/// One diagnostic finding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticResult {
    pub name: String,
    pub status: Status,
    pub message: Option<String>,
    pub path: Option<PathBuf>,
    pub details: Vec<String>,
    pub fixable: bool,
    pub suggestion: Option<String>,
}

impl DiagnosticResult {
    fn ok(name: &str) -> Self {
        Self { name: name.to_owned(), status: Status::Ok, message: None, path: None, details: Vec::new(), fixable: false, suggestion: None }
    }

    fn warn(name: &str, message: impl Into<String>) -> Self {
        Self { name: name.to_owned(), status: Status::Warn, message: Some(message.into()), path: None, details: Vec::new(), fixable: false, suggestion: None }
    }

    fn error(name: &str, message: impl Into<String>) -> Self {
        Self { name: name.to_owned(), status: Status::Error, message: Some(message.into()), path: None, details: Vec::new(), fixable: false, suggestion: None }
    }

    fn fixable(mut self, suggestion: impl Into<String>) -> Self {
        self.fixable = true;
        self.suggestion = Some(suggestion.into());
        self
    }

    fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

/// Run every independent check and return the full list, in a stable
/// order (cheapest/most-fundamental first).
pub fn run_all(root: &Path, repo: &GitRepo, worktree: &WorktreeManager<'_>, config: &TbdConfig) -> Vec<DiagnosticResult> {
    let mut results = Vec::new();
    results.push(check_git_version());
    results.push(check_config(root));
    results.push(check_issues_directory(worktree.path()));
    results.push(check_orphan_temp_files(worktree.path()));

    match storage::list(&worktree.path().join("issues")) {
        Ok(issues) => {
            results.push(check_issue_field_validity(&issues));
            results.push(check_duplicate_permanent_ids(&issues));
            results.push(check_orphaned_dependencies(&issues));
        }
        Err(e) => results.push(DiagnosticResult::error("issue_field_validity", e.to_string())),
    }

    results.push(check_worktree_state(worktree));
    results.push(check_data_location(root, worktree));
    results.push(check_sync_branches(repo, &config.sync.remote, &config.sync.branch));
    results.push(check_sync_consistency(repo, worktree, &config.sync.branch));
    results.push(check_local_data_remote_empty(repo, worktree, &config.sync.remote, &config.sync.branch));
    results.push(check_clone_scenario(repo, worktree, &config.sync.remote, &config.sync.branch));

    results
}

fn check_git_version() -> DiagnosticResult {
    match check_version() {
        Ok(version) => DiagnosticResult::ok("git_version").with_details(vec![version.to_string()]),
        Err(e) => DiagnosticResult::error("git_version", e.to_string()),
    }
}

fn check_config(root: &Path) -> DiagnosticResult {
    let path = root.join(".tbd").join("config.yml");
    if !path.exists() {
        return DiagnosticResult::warn("config", "no config.yml found; defaults are in effect").with_path(path);
    }
    match TbdConfig::load(root) {
        Ok(_) => DiagnosticResult::ok("config").with_path(path),
        Err(e) => DiagnosticResult::error("config", e.to_string()).with_path(path),
    }
}

fn check_issues_directory(worktree_path: &Path) -> DiagnosticResult {
    let path = worktree_path.join("issues");
    if path.is_dir() {
        DiagnosticResult::ok("issues_directory").with_path(path)
    } else {
        DiagnosticResult::warn("issues_directory", "issues directory does not exist yet").with_path(path)
    }
}

fn check_orphan_temp_files(worktree_path: &Path) -> DiagnosticResult {
    let dir = worktree_path.join("issues");
    let orphans = storage::find_orphan_temp_files(&dir);
    if orphans.is_empty() {
        DiagnosticResult::ok("orphan_temp_files")
    } else {
        let details = orphans.iter().map(|p| p.display().to_string()).collect();
        DiagnosticResult::warn("orphan_temp_files", format!("{} orphaned .tmp file(s) found", orphans.len()))
            .with_details(details)
            .fixable("run doctor --fix to delete orphaned temp files")
    }
}

fn check_issue_field_validity(issues: &[crate::issue::Issue]) -> DiagnosticResult {
    // storage::list already fails the whole call on a malformed file, so
    // every issue that reaches here parsed successfully; this check only
    // needs to verify cross-field invariants parsing does not enforce.
    let mut offenders = Vec::new();
    for issue in issues {
        if issue.title.trim().is_empty() {
            offenders.push(format!("{}: empty title", issue.id));
        }
        if let Some(parent) = &issue.parent_id {
            if *parent == issue.id {
                offenders.push(format!("{}: is its own parent", issue.id));
            }
        }
    }
    if offenders.is_empty() {
        DiagnosticResult::ok("issue_field_validity")
    } else {
        DiagnosticResult::error("issue_field_validity", format!("{} issue(s) failed field validation", offenders.len())).with_details(offenders)
    }
}

fn check_duplicate_permanent_ids(issues: &[crate::issue::Issue]) -> DiagnosticResult {
    let mut seen = std::collections::BTreeSet::new();
    let mut duplicates = Vec::new();
    for issue in issues {
        if !seen.insert(issue.id.clone()) {
            duplicates.push(issue.id.to_string());
        }
    }
    if duplicates.is_empty() {
        DiagnosticResult::ok("duplicate_permanent_ids")
    } else {
        DiagnosticResult::error("duplicate_permanent_ids", format!("{} duplicate id(s)", duplicates.len())).with_details(duplicates)
    }
}

fn check_orphaned_dependencies(issues: &[crate::issue::Issue]) -> DiagnosticResult {
    let known: std::collections::BTreeSet<_> = issues.iter().map(|i| i.id.clone()).collect();
    let mut orphans = Vec::new();
    for issue in issues {
        for dep in &issue.dependencies {
            if !known.contains(&dep.target) {
                orphans.push(format!("{} depends on missing {}", issue.id, dep.target));
            }
        }
        if let Some(parent) = &issue.parent_id {
            if !known.contains(parent) {
                orphans.push(format!("{} has missing parent {parent}", issue.id));
            }
        }
    }
    if orphans.is_empty() {
        DiagnosticResult::ok("orphaned_dependencies")
    } else {
        DiagnosticResult::warn("orphaned_dependencies", format!("{} orphaned reference(s)", orphans.len())).with_details(orphans)
    }
}

fn check_worktree_state(worktree: &WorktreeManager<'_>) -> DiagnosticResult {
    match worktree.status() {
        Ok(WorktreeStatus::Valid) => DiagnosticResult::ok("worktree_state").with_path(worktree.path().to_path_buf()),
        Ok(status @ (WorktreeStatus::Missing | WorktreeStatus::Prunable | WorktreeStatus::Corrupted)) => {
            DiagnosticResult::error("worktree_state", format!("worktree is {status:?}"))
                .with_path(worktree.path().to_path_buf())
                .fixable("run doctor --fix to repair the worktree")
        }
        Err(e) => DiagnosticResult::error("worktree_state", e.to_string()),
    }
}

fn check_data_location(root: &Path, worktree: &WorktreeManager<'_>) -> DiagnosticResult {
    let fallback = root.join(".tbd").join("data");
    if fallback.join("issues").is_dir() && matches!(worktree.status(), Ok(WorktreeStatus::Valid)) {
        DiagnosticResult::warn("data_location", "issue data found outside the worktree")
            .with_path(fallback)
            .fixable("run doctor --fix to migrate data into the worktree")
    } else {
        DiagnosticResult::ok("data_location")
    }
}

fn check_sync_branches(repo: &GitRepo, remote: &str, branch: &str) -> DiagnosticResult {
    let local_exists = repo.git_run(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")]).is_ok();
    let remote_exists = repo
        .git_run(&["show-ref", "--verify", "--quiet", &format!("refs/remotes/{remote}/{branch}")])
        .is_ok();
    if local_exists && remote_exists {
        DiagnosticResult::ok("sync_branches")
    } else if !local_exists && !remote_exists {
        DiagnosticResult::warn("sync_branches", "sync branch does not exist locally or on the remote yet; run init")
    } else {
        DiagnosticResult::warn("sync_branches", format!("sync branch divergence: local={local_exists} remote={remote_exists}"))
    }
}

fn check_sync_consistency(repo: &GitRepo, worktree: &WorktreeManager<'_>, branch: &str) -> DiagnosticResult {
    if !matches!(worktree.status(), Ok(WorktreeStatus::Valid)) {
        return DiagnosticResult::warn("sync_consistency", "skipped: worktree is not valid");
    }
    let worktree_head = repo.git_stdout_in(worktree.path(), &["rev-parse", "HEAD"]).ok();
    let branch_head = repo.git_stdout(&["rev-parse", branch]).ok();
    if worktree_head.is_some() && worktree_head == branch_head {
        DiagnosticResult::ok("sync_consistency")
    } else {
        DiagnosticResult::warn("sync_consistency", "worktree HEAD does not match the local sync branch tip")
    }
}

/// Whether `<remote>/<branch>` carries any issue files, without
/// requiring a worktree checkout of it.
fn remote_has_issues(repo: &GitRepo, remote: &str, branch: &str) -> Option<bool> {
    let remote_ref = format!("{remote}/{branch}");
    let out = repo.git_stdout(&["ls-tree", "-r", "--name-only", &remote_ref, "--", "issues"]).ok()?;
    Some(!out.trim().is_empty())
}

/// Cross-check: local issues exist but the remote's sync branch carries
/// none yet, so a sync has never successfully published them.
fn check_local_data_remote_empty(repo: &GitRepo, worktree: &WorktreeManager<'_>, remote: &str, branch: &str) -> DiagnosticResult {
    if !matches!(worktree.status(), Ok(WorktreeStatus::Valid)) {
        return DiagnosticResult::ok("local_data_remote_empty");
    }
    let local_count = storage::list(&worktree.path().join("issues")).map(|i| i.len()).unwrap_or(0);
    if local_count == 0 {
        return DiagnosticResult::ok("local_data_remote_empty");
    }
    match remote_has_issues(repo, remote, branch) {
        Some(true) | None => DiagnosticResult::ok("local_data_remote_empty"),
        Some(false) => DiagnosticResult::warn(
            "local_data_remote_empty",
            format!("{local_count} local issue(s) exist but '{remote}/{branch}' has none; run sync to publish them"),
        ),
    }
}

/// Clone scenario: this repository has never run `init` locally (no
/// worktree, no config) while the remote already carries an active
/// issue store on the sync branch — syncing is effectively disabled
/// here until `init` picks up that existing history.
fn check_clone_scenario(repo: &GitRepo, worktree: &WorktreeManager<'_>, remote: &str, branch: &str) -> DiagnosticResult {
    if !matches!(worktree.status(), Ok(WorktreeStatus::Missing)) {
        return DiagnosticResult::ok("clone_scenario");
    }
    match remote_has_issues(repo, remote, branch) {
        Some(true) => DiagnosticResult::warn(
            "clone_scenario",
            format!("'{remote}/{branch}' already has an issue store but this clone has not run init yet"),
        )
        .fixable("run doctor --fix (or init) to adopt the existing remote history"),
        _ => DiagnosticResult::ok("clone_scenario"),
    }
}
