//! `tbd` — a git-native issue tracker sync engine.
//!
//! A dedicated worktree carries issue data on a sync branch, separate
//! from the user's main checkout. Issues are YAML-front-matter Markdown
//! files; a dual-id scheme (permanent ULID, mutable per-clone short id)
//! lets humans and agents refer to the same issue by a short token
//! without a central allocator. Sync pulls the remote, resolves
//! conflicts field by field, and pushes with bounded retry, recovering
//! through an outbox workspace when a push fails outright.

pub mod config;
pub mod doctor;
pub mod error;
pub mod id;
pub mod issue;
pub mod merge;
pub mod storage;
pub mod sync;
pub mod worktree;
pub mod workspace;

#[cfg(test)]
mod proptests;

pub use error::{Error, Result};
pub use issue::{Issue, IssueId, ShortId};
pub use workspace::Tbd;
