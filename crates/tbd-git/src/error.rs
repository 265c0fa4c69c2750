//! Error type for the git adapter.
//!
//! One unified enum for every failure mode a subprocess git invocation can
//! produce, plus the transient/permanent classification used by
//! [`crate::push::push_with_retry`].

use std::fmt;

/// Errors from the subprocess git adapter.
#[derive(Debug)]
pub enum Error {
    /// A git command exited non-zero.
    Command {
        /// The command that was run, e.g. `"git worktree add"`.
        command: String,
        /// Captured stderr from git.
        stderr: String,
        /// Process exit code, if the process actually exited.
        exit_code: Option<i32>,
    },
    /// An I/O error occurred spawning or communicating with git.
    Io(std::io::Error),
    /// The current directory is not inside a git repository.
    NotARepo,
    /// git's version is older than the minimum this adapter supports.
    UnsupportedVersion {
        /// The version git reported, e.g. `"2.17.1"`.
        found: String,
        /// The minimum supported version, e.g. `"2.20.0"`.
        minimum: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command {
                command,
                stderr,
                exit_code,
            } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::Io(e) => write!(f, "I/O error running git: {e}"),
            Self::NotARepo => write!(f, "not inside a git repository"),
            Self::UnsupportedVersion { found, minimum } => {
                write!(f, "git {found} is older than the minimum supported version {minimum}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
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

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether a push/fetch failure should be retried or reported as final.
///
/// Classification is a pure function of the textual error git produced —
/// no network-layer introspection is available through the subprocess
/// boundary, so this is necessarily a best-effort text match (per
/// `spec.md` §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying in the same session: timeouts, rate limits, 5xx, DNS.
    Transient,
    /// Not worth retrying in the same session: auth, 403/404, protected
    /// branch, or non-fast-forward after the retry budget is exhausted.
    Permanent,
}

/// Classify a git stderr string as [`FailureKind::Transient`] or
/// [`FailureKind::Permanent`].
#[must_use]
pub fn classify_failure(stderr: &str) -> FailureKind {
    let lower = stderr.to_ascii_lowercase();

    const TRANSIENT_MARKERS: &[&str] = &[
        "could not resolve host",
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "temporary failure in name resolution",
        "rate limit",
        "try again",
        "502",
        "503",
        "504",
        "network is unreachable",
        // A bare non-fast-forward rejection means someone else pushed first;
        // it is retryable within the bounded attempt loop (fetch, resolve,
        // retry) and only becomes permanent once that budget is exhausted,
        // which `push_with_retry` handles by falling through to
        // `FailureKind::Permanent` after the last attempt.
        "non-fast-forward",
    ];

    const PERMANENT_MARKERS: &[&str] = &[
        "authentication failed",
        "permission denied",
        "403",
        "404",
        "not found",
        "protected branch",
        "remote rejected",
        "forbidden",
        "repository not found",
        "could not read username",
    ];

    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureKind::Transient;
    }
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureKind::Permanent;
    }
    // Unknown text: default to permanent so callers don't spin retrying
    // something that will never succeed (e.g. an unrecognized hook
    // rejection message). A conservative default, not a guess at intent.
    FailureKind::Permanent
}
