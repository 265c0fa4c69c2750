//! Shared fixtures for cross-module sync scenarios: a bare remote plus
//! one or more clones, wired the way `tbd`'s own tests exercise real
//! `git` subprocesses rather than mocking the DVCS.

use std::path::{Path, PathBuf};
use std::process::Command;

pub struct Remote {
    pub dir: tempfile::TempDir,
}

impl Remote {
    pub fn url(&self) -> &Path {
        self.dir.path()
    }
}

pub fn init_bare_remote() -> Remote {
    let dir = tempfile::tempdir().unwrap();
    run(dir.path(), &["init", "-q", "--bare"]);
    Remote { dir }
}

pub struct Clone {
    pub dir: tempfile::TempDir,
    repo_dir: String,
}

impl Clone {
    pub fn path(&self) -> PathBuf {
        self.dir.path().join(&self.repo_dir)
    }
}

pub fn clone_from(remote: &Remote, name: &str) -> Clone {
    let owned = tempfile::tempdir().unwrap();
    let target = owned.path().join(name);
    run(owned.path(), &["clone", "-q", remote.url().to_str().unwrap(), target.to_str().unwrap()]);
    configure_identity(&target);
    seed_main_branch(&target);
    Clone { dir: owned, repo_dir: name.to_owned() }
}

fn configure_identity(repo: &Path) {
    run(repo, &["config", "user.email", "tester@example.com"]);
    run(repo, &["config", "user.name", "Tester"]);
}

fn seed_main_branch(repo: &Path) {
    // A bare remote starts empty; give the clone a real commit on a
    // default branch so worktree creation for the sync branch has
    // something to diverge from.
    if run_status(repo, &["rev-parse", "--verify", "-q", "HEAD"]) {
        return;
    }
    std::fs::write(repo.join("README.md"), "project\n").unwrap();
    run(repo, &["add", "-A"]);
    run(repo, &["commit", "-q", "-m", "seed"]);
    run(repo, &["push", "-q", "-u", "origin", "HEAD"]);
}

pub fn run(dir: &Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

pub fn run_status(dir: &Path, args: &[&str]) -> bool {
    Command::new("git").args(args).current_dir(dir).output().map(|o| o.status.success()).unwrap_or(false)
}
