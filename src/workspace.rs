//! The top-level facade (`Tbd`) composing the worktree manager, sync
//! engine, and doctor behind a single entry point.
//!
//! `Tbd` holds no cached state beyond what it needs to locate the
//! repository — config, worktree path, and sync branch are resolved
//! fresh on every call rather than cached across calls.

use std::path::{Path, PathBuf};

use tbd_git::GitRepo;

use crate::config::TbdConfig;
use crate::doctor::DiagnosticResult;
use crate::id::IdMapping;
use crate::issue::Issue;
use crate::storage;
use crate::sync::{SyncEngine, SyncOutcome, SyncStatus};
use crate::worktree::WorktreeManager;

const WORKTREE_DIR: &str = ".tbd/worktree";
const MAPPING_FILE: &str = "mappings/ids.yml";

/// Entry point for every tbd operation against one repository.
pub struct Tbd {
    root: PathBuf,
}

impl Tbd {
    /// Discover the repository containing `start` and load its config.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotInitialized`] if no repository is
    /// found, or propagates a git adapter error.
    pub fn discover(start: &Path) -> crate::Result<Self> {
        let repo = GitRepo::discover(start)?;
        Ok(Self { root: repo.root().to_path_buf() })
    }

    /// Wrap an already-known repository root without probing for it.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repo(&self) -> GitRepo {
        GitRepo::new(&self.root)
    }

    fn config(&self) -> crate::Result<TbdConfig> {
        TbdConfig::load(&self.root)
    }

    fn worktree_path(&self) -> PathBuf {
        self.root.join(WORKTREE_DIR)
    }

    /// Create the on-disk state for a new repository: `config.yml` and
    /// the data-plane worktree.
    pub fn init(&self) -> crate::Result<()> {
        std::fs::create_dir_all(self.root.join(".tbd"))?;
        let config_path = self.root.join(".tbd").join("config.yml");
        if !config_path.exists() {
            std::fs::write(&config_path, TbdConfig::default().to_yaml()?)?;
        }

        let repo = self.repo();
        let config = self.config()?;
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());
        worktree.init()
    }

    /// Create a new issue with `title`, `kind`, and `priority`,
    /// allocating both a permanent id and a short id, and persisting it
    /// to the worktree's issues directory.
    pub fn create_issue(&self, title: &str, kind: crate::issue::Kind, priority: crate::issue::Priority) -> crate::Result<(Issue, crate::issue::ShortId)> {
        let repo = self.repo();
        let config = self.config()?;
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());
        if worktree.status()? != crate::worktree::WorktreeStatus::Valid {
            worktree.init()?;
        }

        let now = now_rfc3339();
        let issue = Issue {
            id: crate::id::generate_issue_id(),
            version: 1,
            title: title.to_owned(),
            kind,
            status: crate::issue::Status::Open,
            priority,
            description: String::new(),
            notes: String::new(),
            labels: Default::default(),
            dependencies: Default::default(),
            parent_id: None,
            child_order_hints: None,
            spec_path: None,
            assignee: None,
            due_date: None,
            deferred_until: None,
            closed_at: None,
            close_reason: None,
            external_issue_url: None,
            created_at: now.clone(),
            updated_at: now,
            extensions: Default::default(),
        };

        storage::write(&worktree.path().join("issues"), &issue)?;

        let mapping_path = worktree.path().join(MAPPING_FILE);
        let mut mapping = load_mapping(&mapping_path)?;
        let short_id = mapping.allocate_for(issue.id.clone());
        save_mapping(&mapping_path, &mapping)?;

        Ok((issue, short_id))
    }

    /// Look up an issue by short id, display id, or permanent id.
    pub fn get_issue(&self, input: &str) -> crate::Result<Issue> {
        let config = self.config()?;
        let repo = self.repo();
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());
        let mapping_path = worktree.path().join(MAPPING_FILE);
        let mapping = load_mapping(&mapping_path)?;
        let id = mapping.resolve(input, &config.display.id_prefix)?;
        storage::read(&worktree.path().join("issues"), &id)
    }

    /// List every issue currently on disk.
    pub fn list_issues(&self) -> crate::Result<Vec<Issue>> {
        let config = self.config()?;
        let repo = self.repo();
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());
        storage::list(&worktree.path().join("issues"))
    }

    /// Run a full sync round.
    pub fn sync(&self) -> crate::Result<SyncOutcome> {
        let repo = self.repo();
        let config = self.config()?;
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());
        let engine = SyncEngine::new(&repo, &worktree, config.sync.remote.clone(), config.sync.branch.clone());
        engine.sync()
    }

    /// Report sync status without mutating anything.
    pub fn sync_status(&self) -> crate::Result<SyncStatus> {
        let repo = self.repo();
        let config = self.config()?;
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());
        let engine = SyncEngine::new(&repo, &worktree, config.sync.remote.clone(), config.sync.branch.clone());
        engine.status()
    }

    /// Run every doctor check.
    pub fn doctor(&self) -> crate::Result<Vec<DiagnosticResult>> {
        let repo = self.repo();
        let config = self.config()?;
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());
        Ok(crate::doctor::run_all(&self.root, &repo, &worktree, &config))
    }

    /// Apply every fixable doctor finding: repair the worktree, migrate
    /// stray data, and sweep orphan temp files.
    pub fn doctor_fix(&self) -> crate::Result<Vec<DiagnosticResult>> {
        let repo = self.repo();
        let config = self.config()?;
        let worktree = WorktreeManager::new(&repo, self.worktree_path(), config.sync.branch.clone(), config.sync.remote.clone());

        let before = crate::doctor::run_all(&self.root, &repo, &worktree, &config);
        for finding in &before {
            if !finding.fixable {
                continue;
            }
            match finding.name.as_str() {
                "worktree_state" => {
                    worktree.repair()?;
                }
                "data_location" => {
                    let fallback = self.root.join(".tbd").join("data");
                    worktree.migrate_data_to_worktree(&fallback, "issues")?;
                }
                "orphan_temp_files" => {
                    storage::sweep_orphan_temp_files(&worktree.path().join("issues"))?;
                }
                "clone_scenario" => {
                    worktree.init()?;
                }
                _ => {}
            }
        }

        Ok(crate::doctor::run_all(&self.root, &repo, &worktree, &config))
    }
}

fn load_mapping(path: &Path) -> crate::Result<IdMapping> {
    match std::fs::read_to_string(path) {
        Ok(text) => IdMapping::parse(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IdMapping::default()),
        Err(e) => Err(e.into()),
    }
}

fn save_mapping(path: &Path, mapping: &IdMapping) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, mapping.to_yaml()?)?;
    Ok(())
}

/// Current time as RFC-3339, second precision, matching the format used
/// throughout the issue file examples (`spec.md` §6).
fn now_rfc3339() -> String {
    let secs = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs();
    format_unix_timestamp(secs)
}

/// Civil-calendar conversion from a Unix timestamp, without pulling in
/// a date/time crate: a minimal proleptic-Gregorian day-number
/// algorithm (Howard Hinnant's `civil_from_days`), the same approach
/// `git`'s own `date.c` uses.
fn format_unix_timestamp(secs: u64) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        Command::new("git").args(["init", "-q", "-b", "main"]).current_dir(dir.path()).status().unwrap();
        Command::new("git").args(["config", "user.email", "t@example.com"]).current_dir(dir.path()).status().unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir.path()).status().unwrap();
        std::fs::write(dir.path().join("README.md"), "x").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).status().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir.path()).status().unwrap();
        dir
    }

    #[test]
    fn init_creates_config_and_worktree() {
        let dir = init_repo();
        let tbd = Tbd::at(dir.path());
        tbd.init().unwrap();
        assert!(dir.path().join(".tbd/config.yml").exists());
        assert!(dir.path().join(".tbd/worktree").is_dir());
    }

    #[test]
    fn create_then_get_round_trips() {
        let dir = init_repo();
        let tbd = Tbd::at(dir.path());
        tbd.init().unwrap();

        let (issue, short_id) = tbd.create_issue("Fix login", crate::issue::Kind::Bug, crate::issue::Priority::new(1).unwrap()).unwrap();
        let fetched = tbd.get_issue(short_id.as_str()).unwrap();
        assert_eq!(fetched.id, issue.id);
        assert_eq!(fetched.title, "Fix login");
    }

    #[test]
    fn list_issues_reflects_created_issue() {
        let dir = init_repo();
        let tbd = Tbd::at(dir.path());
        tbd.init().unwrap();
        tbd.create_issue("one", crate::issue::Kind::Task, crate::issue::Priority::new(2).unwrap()).unwrap();
        let issues = tbd.list_issues().unwrap();
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn doctor_reports_ok_after_init() {
        let dir = init_repo();
        let tbd = Tbd::at(dir.path());
        tbd.init().unwrap();
        let results = tbd.doctor().unwrap();
        assert!(results.iter().any(|r| r.name == "worktree_state" && r.status == crate::doctor::Status::Ok));
    }

    #[test]
    fn unix_epoch_formats_as_expected() {
        assert_eq!(format_unix_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_unix_timestamp(1_732_089_723), "2024-11-20T08:02:03Z");
    }
}
