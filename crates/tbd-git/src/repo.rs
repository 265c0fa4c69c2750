//! Core git subprocess wrapper.
//!
//! [`GitRepo`] is a narrow surface over the `git` binary: every invocation
//! in this crate (and in `tbd`) goes through its `git_stdout`/`git_stdout_in`/
//! `git_run` helpers.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// A handle to a git repository, rooted at a fixed directory.
///
/// `GitRepo` is cheap to construct and carries no cached state — every
/// method re-invokes git. Per `spec.md` §9, there is no module-level
/// mutable singleton; callers construct a fresh `GitRepo` per command.
#[derive(Clone, Debug)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Wrap an existing repository root (the directory containing `.git`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discover the repository root starting from `start` by asking git,
    /// returning [`Error::NotARepo`] if `start` is not inside one.
    pub fn discover(start: &Path) -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(start)
            .output()?;
        if !output.status.success() {
            return Err(Error::NotARepo);
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        Ok(Self::new(PathBuf::from(root)))
    }

    /// The repository root this handle operates on.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `start` is inside a git repository at all (bare or not).
    #[must_use]
    pub fn is_in_repo(start: &Path) -> bool {
        Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(start)
            .output()
            .is_ok_and(|o| o.status.success())
    }

    /// The name of the current branch, or `None` in detached-HEAD state.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.git_stdout(&["symbolic-ref", "--short", "-q", "HEAD"]);
        match out {
            Ok(name) => {
                let name = name.trim();
                if name.is_empty() { Ok(None) } else { Ok(Some(name.to_owned())) }
            }
            Err(Error::Command { exit_code: Some(1), .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run `git <args>` rooted at this repo and return trimmed stdout.
    pub fn git_stdout(&self, args: &[&str]) -> Result<String> {
        git_stdout_in(&self.root, args)
    }

    /// Run `git <args>` in an arbitrary directory (e.g. a worktree path
    /// that is not `self.root`) and return trimmed stdout.
    pub fn git_stdout_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        git_stdout_in(dir, args)
    }

    /// Run `git <args>` for side effects only.
    pub fn git_run(&self, args: &[&str]) -> Result<()> {
        self.git_stdout(args).map(|_| ())
    }

    /// Run `git <args>` for side effects only, in a specific directory.
    pub fn git_run_in(&self, dir: &Path, args: &[&str]) -> Result<()> {
        self.git_stdout_in(dir, args).map(|_| ())
    }

    /// `git status --porcelain` inside `dir`, split into non-empty lines.
    pub fn status_porcelain(&self, dir: &Path) -> Result<Vec<String>> {
        let out = self.git_stdout_in(dir, &["status", "--porcelain"])?;
        Ok(out.lines().map(str::to_owned).filter(|l| !l.trim().is_empty()).collect())
    }

    /// Stage everything and commit inside `dir`. `no_verify` bypasses the
    /// user's pre-commit hooks — used for every sync-internal commit per
    /// `spec.md` §5 ("Hooks bypass").
    pub fn commit_all(&self, dir: &Path, message: &str, no_verify: bool) -> Result<()> {
        self.git_run_in(dir, &["add", "-A"])?;
        let mut args = vec!["commit", "-m", message];
        if no_verify {
            args.push("--no-verify");
        }
        self.git_run_in(dir, &args)
    }

    /// `git rev-list --count a..b`.
    pub fn rev_list_count(&self, dir: &Path, range: &str) -> Result<u32> {
        let out = self.git_stdout_in(dir, &["rev-list", "--count", range])?;
        Ok(out.trim().parse().unwrap_or(0))
    }

    /// `git diff --name-status <range>`, parsed into (status, path) pairs.
    pub fn diff_name_status(&self, dir: &Path, range: &str) -> Result<Vec<(char, String)>> {
        let out = self.git_stdout_in(dir, &["diff", "--name-status", range])?;
        Ok(parse_name_status(&out))
    }

    /// `git show <rev>:<path>`, returning `None` if the path does not
    /// exist at that revision rather than erroring.
    pub fn show_path_at(&self, dir: &Path, rev: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{rev}:{path}");
        match self.git_stdout_in(dir, &["show", &spec]) {
            Ok(content) => Ok(Some(content)),
            Err(Error::Command { stderr, .. })
                if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Merge `source` into the current branch of the worktree at `dir`.
    /// Returns `Ok(true)` on a clean merge, `Ok(false)` if the merge left
    /// conflict markers (caller inspects `status_porcelain`/working tree
    /// to proceed with field-level merge).
    ///
    /// Unrelated histories are allowed: two clones that each ran `init`
    /// before either had pushed independently create their own orphan
    /// commit on the sync branch, so the first merge between them has no
    /// common ancestor by construction, not by accident.
    pub fn merge(&self, dir: &Path, source: &str) -> Result<bool> {
        let out = Command::new("git")
            .args(["merge", "--no-edit", "--allow-unrelated-histories", source])
            .current_dir(dir)
            .output()?;
        if out.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("CONFLICT") || stderr.contains("Automatic merge failed") {
            return Ok(false);
        }
        Err(Error::Command {
            command: format!("git merge {source}"),
            stderr: stderr.trim().to_owned(),
            exit_code: out.status.code(),
        })
    }

    /// Abort an in-progress merge in `dir`.
    pub fn merge_abort(&self, dir: &Path) -> Result<()> {
        self.git_run_in(dir, &["merge", "--abort"])
    }

    /// The best common ancestor of `a` and `b`, or `None` if they share
    /// no history (e.g. one side is an unrelated orphan branch).
    pub fn merge_base(&self, dir: &Path, a: &str, b: &str) -> Result<Option<String>> {
        match self.git_stdout_in(dir, &["merge-base", a, b]) {
            Ok(rev) if !rev.is_empty() => Ok(Some(rev)),
            Ok(_) => Ok(None),
            Err(Error::Command { exit_code: Some(1), .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `git fetch <remote> <branch>`.
    pub fn fetch(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        self.git_run_in(dir, &["fetch", remote, branch])
    }

    /// Create `branch` if it does not already exist, pointing at an empty
    /// commit on an orphan history. Used by worktree `init`.
    pub fn ensure_branch_exists(&self, branch: &str) -> Result<bool> {
        let exists = self
            .git_stdout(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .is_ok();
        if exists {
            return Ok(false);
        }
        // Build the orphan branch in a scratch worktree-less way: create it
        // via plumbing so the caller's current checkout is untouched.
        let tree = self.git_stdout(&["hash-object", "-t", "tree", "/dev/null"]).unwrap_or_default();
        let tree = if tree.is_empty() {
            // Fallback for platforms without /dev/null semantics honored by
            // hash-object: use git's well-known empty tree OID.
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904".to_owned()
        } else {
            tree
        };
        let commit = self.git_stdout(&[
            "commit-tree",
            &tree,
            "-m",
            "initialize sync branch",
        ])?;
        self.git_run(&["update-ref", &format!("refs/heads/{branch}"), commit.trim()])?;
        Ok(true)
    }
}

fn git_stdout_in(dir: &Path, args: &[&str]) -> Result<String> {
    tracing::debug!(?dir, ?args, "git");
    let output = Command::new("git").args(args).current_dir(dir).output()?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_owned())
    } else {
        Err(Error::Command {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Parse the output of `git diff --name-status`.
///
/// Lines look like `M\tpath` or `R100\told\tnew` for renames; renames are
/// reported under the new path only (adapter callers treat a rename as a
/// modify of the destination, which is sufficient for issue-file diffing
/// since issue filenames are permanent ids and never renamed by users).
fn parse_name_status(output: &str) -> Vec<(char, String)> {
    let mut result = Vec::new();
    for line in output.lines() {
        let mut parts = line.split('\t');
        let Some(status) = parts.next() else { continue };
        let Some(code) = status.chars().next() else { continue };
        match code {
            'R' | 'C' => {
                let _old = parts.next();
                if let Some(new) = parts.next() {
                    result.push((code, new.to_owned()));
                }
            }
            _ => {
                if let Some(path) = parts.next() {
                    result.push((code, path.to_owned()));
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_name_status() {
        let out = "M\tissues/is-01.md\nA\tissues/is-02.md\nD\tissues/is-03.md";
        let parsed = parse_name_status(out);
        assert_eq!(parsed, vec![
            ('M', "issues/is-01.md".to_owned()),
            ('A', "issues/is-02.md".to_owned()),
            ('D', "issues/is-03.md".to_owned()),
        ]);
    }

    #[test]
    fn parses_rename_under_new_path() {
        let out = "R100\tissues/old.md\tissues/new.md";
        let parsed = parse_name_status(out);
        assert_eq!(parsed, vec![('R', "issues/new.md".to_owned())]);
    }

    #[test]
    fn parses_empty_output() {
        assert!(parse_name_status("").is_empty());
    }
}
