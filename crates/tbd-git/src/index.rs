//! Isolated-index execution (`spec.md` §4.1 `with_isolated_index`).
//!
//! Main-branch operations that touch data-sync state must never perturb
//! the user's staged changes. Since every invocation in this crate is a
//! freshly spawned `git` subprocess, scoping `GIT_INDEX_FILE` to that one
//! child process is sufficient — there is no ambient state to restore
//! afterwards, unlike an in-process library that mutates a shared index
//! handle.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Run `git <args>` in `dir` with `GIT_INDEX_FILE` pointed at a private,
/// temporary index file, so the operation never touches `dir`'s real
/// index (and therefore never disturbs anything the user has staged).
pub fn git_stdout_isolated(dir: &Path, args: &[&str], index_path: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_INDEX_FILE", index_path)
        .output()?;
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

/// Run `f` with a throwaway index file, removing it afterwards regardless
/// of whether `f` succeeded.
pub fn with_isolated_index<T>(dir: &Path, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let index_file = tempfile::NamedTempFile::new_in(dir_or_tmp(dir))?;
    let index_path: PathBuf = index_file.path().to_path_buf();
    // Drop the handle but keep the path; git will (re)create the file as
    // needed when it writes the index.
    let result = f(&index_path);
    let _ = std::fs::remove_file(&index_path);
    result
}

fn dir_or_tmp(dir: &Path) -> PathBuf {
    if dir.exists() { dir.to_path_buf() } else { std::env::temp_dir() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    #[test]
    fn isolated_index_does_not_touch_real_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        StdCommand::new("git").args(["init", "-q"]).current_dir(dir.path()).output().expect("git init");
        StdCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir.path())
            .output()
            .expect("git config email");
        StdCommand::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir.path())
            .output()
            .expect("git config name");

        std::fs::write(dir.path().join("tracked.txt"), "staged already").unwrap();
        StdCommand::new("git").args(["add", "tracked.txt"]).current_dir(dir.path()).output().unwrap();

        let real_index_before =
            std::fs::read(dir.path().join(".git/index")).unwrap_or_default();

        std::fs::write(dir.path().join("other.txt"), "isolated add").unwrap();
        with_isolated_index(dir.path(), |index_path| {
            git_stdout_isolated(dir.path(), &["add", "other.txt"], index_path)
        })
        .expect("isolated add should succeed");

        let real_index_after = std::fs::read(dir.path().join(".git/index")).unwrap_or_default();
        assert_eq!(real_index_before, real_index_after, "real index must be untouched");
    }
}
