//! Unified error taxonomy for tbd (`spec.md` §7).
//!
//! Each variant is self-contained: a caller should be able to tell what
//! happened, where data lives now, and what to run next without digging
//! into `details`. A hand-rolled enum with a manual `Display` and
//! `source()`, not `thiserror`.

use std::fmt;
use std::path::PathBuf;

use tbd_git::FailureKind;

/// Unified error type for tbd operations.
#[derive(Debug)]
pub enum Error {
    /// No `<tbd>/config.yml` found — the repository has not been
    /// initialized.
    NotInitialized {
        /// Root the lookup started from.
        root: PathBuf,
    },

    /// An issue, branch, path, or mapping entry could not be found.
    NotFound {
        /// What kind of thing was missing (issue id, branch name, ...).
        what: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A value failed schema/format validation: malformed id, unknown
    /// status/kind, out-of-range priority, bad YAML, bad prefix.
    Validation {
        /// The field or input that failed validation.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A sync operation failed in a way that is worth retrying later in
    /// the same session (network blip, rate limit, timeout).
    SyncTransient {
        /// What step failed (fetch, push, ...).
        step: String,
        /// Underlying detail from the git adapter.
        detail: String,
    },

    /// A sync operation failed in a way that will not succeed by
    /// retrying in the same session (auth, forbidden, protected branch).
    /// Triggers outbox auto-save.
    SyncPermanent {
        /// What step failed.
        step: String,
        /// Underlying detail from the git adapter.
        detail: String,
        /// Whether the caller's new/modified issues were saved to the
        /// outbox workspace before returning this error.
        outbox_saved: bool,
    },

    /// The data-plane worktree is absent and auto-create was not
    /// requested or was not possible.
    WorktreeMissing {
        /// Where the worktree was expected.
        path: PathBuf,
    },

    /// The data-plane worktree exists but is not usable (not attached to
    /// the sync branch, or HEAD does not resolve).
    WorktreeCorrupted {
        /// Where the worktree lives.
        path: PathBuf,
        /// Human-readable description of the corruption.
        detail: String,
    },

    /// An internal invariant was violated: text conflict markers
    /// survived staging, or some other state the engine should never
    /// produce. The operation refuses to commit.
    Bug {
        /// What invariant was violated.
        detail: String,
        /// Files the user needs to look at to recover manually, if any.
        files: Vec<PathBuf>,
    },

    /// A git adapter failure that does not carry sync-retry semantics
    /// (e.g. a worktree-lifecycle command failing outright).
    Git(tbd_git::Error),

    /// An I/O error outside of git (reading/writing issue files, the
    /// mapping, config, etc).
    Io(std::io::Error),
}

impl Error {
    /// Classify a failed git push/fetch into [`Error::SyncTransient`] or
    /// [`Error::SyncPermanent`], per `spec.md` §7's propagation policy.
    #[must_use]
    pub fn from_push_failure(step: &str, kind: FailureKind, detail: String, outbox_saved: bool) -> Self {
        match kind {
            FailureKind::Transient => Self::SyncTransient { step: step.to_owned(), detail },
            FailureKind::Permanent => Self::SyncPermanent { step: step.to_owned(), detail, outbox_saved },
        }
    }

    /// The process exit code this error maps to (`spec.md` §6).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotInitialized { .. } => 10,
            Self::NotFound { .. } => 11,
            Self::Validation { .. } => 2,
            Self::SyncTransient { .. } | Self::SyncPermanent { .. } => 12,
            Self::WorktreeMissing { .. } => 13,
            Self::WorktreeCorrupted { .. } => 14,
            Self::Bug { .. } | Self::Git(_) | Self::Io(_) => 1,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized { root } => {
                write!(f, "no tbd state found under {}; run init first", root.display())
            }
            Self::NotFound { what, id } => write!(f, "{what} '{id}' not found"),
            Self::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            Self::SyncTransient { step, detail } => {
                write!(f, "{step} failed (transient, safe to retry): {detail}")
            }
            Self::SyncPermanent { step, detail, outbox_saved } => {
                write!(f, "{step} failed (permanent): {detail}")?;
                if *outbox_saved {
                    write!(f, "; new/modified issues were saved to the outbox workspace")?;
                }
                Ok(())
            }
            Self::WorktreeMissing { path } => {
                write!(f, "data-plane worktree missing at {}; run sync --fix to recreate it", path.display())
            }
            Self::WorktreeCorrupted { path, detail } => {
                write!(f, "data-plane worktree at {} is corrupted: {detail}; run sync --fix to repair it", path.display())
            }
            Self::Bug { detail, files } => {
                write!(f, "internal invariant violated: {detail}")?;
                if !files.is_empty() {
                    write!(f, " (files: {})", files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))?;
                }
                Ok(())
            }
            Self::Git(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Git(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tbd_git::Error> for Error {
    fn from(e: tbd_git::Error) -> Self {
        Self::Git(e)
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let errs = [
            Error::NotInitialized { root: PathBuf::from("/r") },
            Error::NotFound { what: "issue".into(), id: "is-1".into() },
            Error::Validation { field: "priority".into(), reason: "out of range".into() },
            Error::WorktreeMissing { path: PathBuf::from("/w") },
            Error::WorktreeCorrupted { path: PathBuf::from("/w"), detail: "bad".into() },
        ];
        let codes: Vec<i32> = errs.iter().map(Error::exit_code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len(), "exit codes should be distinct: {codes:?}");
    }

    #[test]
    fn permanent_push_failure_mentions_outbox_when_saved() {
        let err = Error::from_push_failure("push", FailureKind::Permanent, "403 forbidden".into(), true);
        assert!(err.to_string().contains("outbox"));
    }
}
