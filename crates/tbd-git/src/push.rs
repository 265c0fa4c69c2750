//! `push_with_retry` (`spec.md` §4.1 / §4.5).
//!
//! Attempts a push; on non-fast-forward rejection, fetches and invokes the
//! caller's conflict-resolution callback before retrying, bounded to a
//! small number of attempts.

use std::path::Path;
use std::process::Command;

use crate::error::{Error, FailureKind, Result, classify_failure};
use crate::repo::GitRepo;

/// Maximum push attempts before giving up and classifying the failure as
/// terminal.
pub const MAX_ATTEMPTS: u32 = 3;

/// Outcome of [`GitRepo::push_with_retry`].
#[derive(Debug)]
pub enum PushOutcome {
    /// The push succeeded, possibly after one or more conflict-resolving
    /// retries.
    Success {
        /// How many attempts it took (1 means no retry was needed).
        attempts: u32,
    },
    /// All attempts were exhausted, or the rejection was classified as
    /// permanent. `kind` tells the caller whether retrying later (in a
    /// fresh session) is worth it.
    Failed {
        /// Transient vs. permanent classification of the final error.
        kind: FailureKind,
        /// The underlying git error from the last attempt.
        error: Error,
    },
}

impl GitRepo {
    /// Push `branch` to `remote`, retrying through `on_conflict` on
    /// non-fast-forward rejection.
    ///
    /// `on_conflict` is invoked after a `fetch` of the rejected branch and
    /// is expected to perform a field-level merge in the worktree at
    /// `dir`, producing a new local commit to retry the push with.
    pub fn push_with_retry(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        mut on_conflict: impl FnMut() -> Result<()>,
    ) -> PushOutcome {
        let mut last_err: Option<Error> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match push_once(dir, remote, branch) {
                Ok(()) => return PushOutcome::Success { attempts: attempt },
                Err(e) => {
                    let stderr = match &e {
                        Error::Command { stderr, .. } => stderr.clone(),
                        other => other.to_string(),
                    };
                    let kind = classify_failure(&stderr);
                    if kind == FailureKind::Permanent {
                        return PushOutcome::Failed { kind, error: e };
                    }
                    if attempt == MAX_ATTEMPTS {
                        last_err = Some(e);
                        break;
                    }
                    if self.fetch(dir, remote, branch).is_err() {
                        last_err = Some(e);
                        break;
                    }
                    if let Err(merge_err) = on_conflict() {
                        return PushOutcome::Failed { kind: FailureKind::Permanent, error: merge_err };
                    }
                    last_err = Some(e);
                }
            }
        }
        PushOutcome::Failed {
            kind: FailureKind::Permanent,
            error: last_err.unwrap_or(Error::NotARepo),
        }
    }
}

fn push_once(dir: &Path, remote: &str, branch: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["push", remote, branch])
        .current_dir(dir)
        .output()?;
    if output.status.success() {
        return Ok(());
    }
    Err(Error::Command {
        command: format!("git push {remote} {branch}"),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        exit_code: output.status.code(),
    })
}
